use std::time::Duration;

use thiserror::Error;

use crate::domain::{LaneKey, TaskId};

/// Why a record settled without ever running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("task {task_id} on lane {key} waited {waited:?} without starting (queue timeout {timeout:?})")]
    Timeout {
        key: LaneKey,
        task_id: TaskId,
        waited: Duration,
        timeout: Duration,
    },

    #[error("task {task_id} on lane {key} was cleared before it started")]
    Cleared { key: LaneKey, task_id: TaskId },

    #[error("queue is closed")]
    Closed,
}

impl Rejection {
    pub const TIMEOUT_CODE: &'static str = "QUEUE_TIMEOUT";
    pub const CLEARED_CODE: &'static str = "QUEUE_CLEARED";
    pub const CLOSED_CODE: &'static str = "QUEUE_CLOSED";

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Timeout { .. } => Self::TIMEOUT_CODE,
            Rejection::Cleared { .. } => Self::CLEARED_CODE,
            Rejection::Closed => Self::CLOSED_CODE,
        }
    }
}

/// Settled result of an enqueued operation that did not succeed.
///
/// `Operation` means the operation ran and failed; `Rejected` means it never ran.
#[derive(Debug, Error)]
pub enum QueueError<E> {
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    #[error("{0}")]
    Rejected(#[source] Rejection),

    /// The settle handle was dropped without a result (the operation panicked, or the
    /// runtime went away underneath it).
    #[error("task was abandoned before it settled")]
    Abandoned,
}

impl<E> QueueError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueueError::Rejected(Rejection::Timeout { .. }))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            QueueError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// The operation's own error, if it ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            QueueError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("queue wait timeout must be between {min:?} and {max:?}, got {got:?}")]
    WaitTimeoutOutOfRange {
        got: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("invalid retry policy: {0}")]
    RetryPolicy(String),

    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no tokio runtime is running; build the queue from inside a runtime")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
