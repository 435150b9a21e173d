//! Task record: one enqueued unit of work plus its settle handle.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::job::Job;
use crate::domain::TaskId;

/// A record leaves its lane's `pending` list exactly once: popped by the drain loop, evicted
/// by the timeout reaper, or taken by `clear_all`. Whoever removes it owns the `job` and is
/// the only one able to settle it.
pub(crate) struct TaskRecord {
    pub(crate) task_id: TaskId,
    job: Box<dyn Job>,
    /// Opaque caller metadata, used for logging only.
    pub(crate) context: serde_json::Value,
    pub(crate) enqueued_at: Instant,
    /// Latest instant at which the record may still start.
    pub(crate) deadline: Instant,
}

impl TaskRecord {
    pub(crate) fn new(
        task_id: TaskId,
        job: Box<dyn Job>,
        context: serde_json::Value,
        enqueued_at: Instant,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            task_id,
            job,
            context,
            enqueued_at,
            deadline: enqueued_at + wait_timeout,
        }
    }

    pub(crate) fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub(crate) fn into_job(self) -> Box<dyn Job> {
        self.job
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("task_id", &self.task_id)
            .field("context", &self.context)
            .field("enqueued_at", &self.enqueued_at)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
