//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MIN_WAIT_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(60);
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_BACKLOG_WARN_THRESHOLD: usize = 10;

/// Configuration for a [`KeyedQueue`](super::KeyedQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a record may wait before it starts. Does not bound execution time.
    #[serde(with = "duration_ms", default = "default_wait_timeout")]
    pub wait_timeout: Duration,

    /// How long an idle lane is kept before its state is reclaimed.
    #[serde(with = "duration_ms", default = "default_idle_grace")]
    pub idle_grace: Duration,

    /// How often the idle-lane sweep runs.
    #[serde(with = "duration_ms", default = "default_reap_interval")]
    pub reap_interval: Duration,

    /// Pending depth above which an enqueue logs a backlog warning.
    #[serde(default = "default_backlog_warn_threshold")]
    pub backlog_warn_threshold: usize,
}

fn default_wait_timeout() -> Duration {
    DEFAULT_WAIT_TIMEOUT
}

fn default_idle_grace() -> Duration {
    DEFAULT_IDLE_GRACE
}

fn default_reap_interval() -> Duration {
    DEFAULT_REAP_INTERVAL
}

fn default_backlog_warn_threshold() -> usize {
    DEFAULT_BACKLOG_WARN_THRESHOLD
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            idle_grace: DEFAULT_IDLE_GRACE,
            reap_interval: DEFAULT_REAP_INTERVAL,
            backlog_warn_threshold: DEFAULT_BACKLOG_WARN_THRESHOLD,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backlog_warn_threshold(mut self, threshold: usize) -> Self {
        self.backlog_warn_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_wait_timeout(self.wait_timeout)?;
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "reap_interval",
            });
        }
        Ok(())
    }

    /// Defaults overridden by `LANES_WAIT_TIMEOUT_MS`, `LANES_IDLE_GRACE_MS`,
    /// `LANES_REAP_INTERVAL_MS` and `LANES_BACKLOG_WARN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var(&lookup, "LANES_WAIT_TIMEOUT_MS")? {
            config.wait_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "LANES_IDLE_GRACE_MS")? {
            config.idle_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "LANES_REAP_INTERVAL_MS")? {
            config.reap_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = parse_var(&lookup, "LANES_BACKLOG_WARN")? {
            config.backlog_warn_threshold = usize::try_from(threshold).map_err(|_| {
                ConfigError::InvalidEnv {
                    var: "LANES_BACKLOG_WARN",
                    value: threshold.to_string(),
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn check_wait_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout < MIN_WAIT_TIMEOUT || timeout > MAX_WAIT_TIMEOUT {
        return Err(ConfigError::WaitTimeoutOutOfRange {
            got: timeout,
            min: MIN_WAIT_TIMEOUT,
            max: MAX_WAIT_TIMEOUT,
        });
    }
    Ok(())
}

fn parse_var(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
