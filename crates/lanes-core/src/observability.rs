use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::LaneKey;

/// Read-only snapshot of a [`KeyedQueue`](crate::queue::KeyedQueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Operations that ran to completion, successfully or not.
    pub total_processed: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    /// Lanes currently holding state (busy, queued, or idle within the grace period).
    pub active_keys: usize,
    pub max_depth_observed: usize,
    pub timeout_count: u64,
    pub cleared_count: u64,
    pub wait_timeout_ms: u64,
    pub lanes: Vec<LaneStats>,
    pub taken_at: DateTime<Utc>,
}

impl QueueStats {
    pub fn lane(&self, key: &LaneKey) -> Option<&LaneStats> {
        self.lanes.iter().find(|lane| &lane.key == key)
    }

    /// Records waiting across every lane.
    pub fn pending_total(&self) -> usize {
        self.lanes.iter().map(|lane| lane.depth).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStats {
    pub key: LaneKey,
    /// Records waiting to start (excludes the one running).
    pub depth: usize,
    pub processing: bool,
    pub processed_count: u64,
    pub age_ms: u64,
    pub oldest_pending_age_ms: Option<u64>,
}

/// Result of [`KeyedQueue::shutdown`](crate::queue::KeyedQueue::shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Every lane went idle within the grace period.
    pub drained: bool,
    /// Pending records rejected because the grace period ran out.
    pub cleared: usize,
}
