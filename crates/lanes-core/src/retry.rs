//! Retry executor: bounded exponential backoff with symmetric jitter.
//!
//! The executor never decides on its own whether a failure is transient; it asks the
//! [`ErrorClassifier`] after every failed attempt.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{ErrorClassifier, ErrorRecord};
use crate::error::ConfigError;
use crate::queue::duration_ms;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Retry policy.
///
/// `max_attempts = N` allows at most N executions of the operation, counting the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Delay is spread uniformly over `delay * (1 ± jitter_ratio)`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter_ratio: f64,
    ) -> Result<Self, ConfigError> {
        let policy = Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_ratio,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::RetryPolicy("max_attempts must be at least 1".into()));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::RetryPolicy("base_delay must be positive".into()));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::RetryPolicy(format!(
                "max_delay {:?} is below base_delay {:?}",
                self.max_delay, self.base_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::RetryPolicy(format!(
                "jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }

    /// Delay after the `attempt`-th execution failed (1-indexed).
    ///
    /// `min(max, base * 2^(attempt-1))`, jittered by `± jitter_ratio`, rounded to the
    /// millisecond and kept within `[base_delay, max_delay]`.
    pub fn delay_for_attempt<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay.as_secs_f64() * 1_000.0;
        let max = self.max_delay.as_secs_f64() * 1_000.0;

        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let capped = (base * 2f64.powi(exponent)).min(max);

        let jitter = if self.jitter_ratio > 0.0 {
            rng.gen_range(-1.0..=1.0) * self.jitter_ratio * capped
        } else {
            0.0
        };

        // max() then min(): an unvalidated policy with max < base gets max, never a panic
        let millis = (capped + jitter).round().max(base.round()).min(max.round());
        Duration::from_millis(millis as u64)
    }
}

/// Why the executor stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    NotRetryable,
    Exhausted,
}

impl fmt::Display for GiveUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUp::NotRetryable => f.write_str("not retryable"),
            GiveUp::Exhausted => f.write_str("attempts exhausted"),
        }
    }
}

/// Why `run` returned without a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The policy failed validation; the operation never ran.
    #[error("operation not run: {0}")]
    Policy(#[source] ConfigError),

    /// The last failure, annotated with how many executions it took.
    #[error("gave up after {attempts} attempt(s), {reason}: {error}")]
    GaveUp {
        attempts: u32,
        reason: GiveUp,
        /// Classification of `error`.
        record: ErrorRecord,
        #[source]
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Executions spent. `0` when the policy was rejected.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Policy(_) => 0,
            RetryError::GaveUp { attempts, .. } => *attempts,
        }
    }

    pub fn reason(&self) -> Option<GiveUp> {
        match self {
            RetryError::Policy(_) => None,
            RetryError::GaveUp { reason, .. } => Some(*reason),
        }
    }

    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            RetryError::Policy(_) => None,
            RetryError::GaveUp { record, .. } => Some(record),
        }
    }

    /// The unwrapped final failure, if the operation ran at all.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Policy(_) => None,
            RetryError::GaveUp { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
}

impl RetryExecutor {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self { classifier }
    }

    /// Run `operation` until it succeeds, fails with something non-retryable, or
    /// `policy.max_attempts` executions have failed.
    ///
    /// An invalid policy is rejected with [`RetryError::Policy`] before the first execution.
    pub async fn run<F, Fut, T, E>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        if let Err(error) = policy.validate() {
            warn!(%error, "retry policy rejected");
            return Err(RetryError::Policy(error));
        }

        let mut attempt: u32 = 1;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let record = self.classifier.classify(&error);
            let give_up = if !record.retryable {
                Some(GiveUp::NotRetryable)
            } else if attempt >= policy.max_attempts {
                Some(GiveUp::Exhausted)
            } else {
                None
            };
            if let Some(reason) = give_up {
                debug!(
                    attempt,
                    kind = %record.kind,
                    %reason,
                    error = %error,
                    "giving up"
                );
                return Err(RetryError::GaveUp {
                    attempts: attempt,
                    reason,
                    record,
                    error,
                });
            }

            let delay = policy.delay_for_attempt(attempt, &mut rand::thread_rng());
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                kind = %record.kind,
                code = record.code.as_deref().unwrap_or("-"),
                error = %error,
                "attempt failed, retrying"
            );
            drop(error);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
