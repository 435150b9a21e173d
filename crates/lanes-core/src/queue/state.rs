//! Per-lane state machine.
//!
//! ```text
//! absent --enqueue--> Processing --drain empties--> Idle --grace elapsed--> absent
//!                        ^                            |
//!                        +---------- enqueue ---------+
//! ```
//!
//! `LanePhase::Processing` is the lane's only mutual-exclusion device: exactly one drain
//! task owns a lane while it is set, and a second enqueue only appends to `pending`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::TaskRecord;
use crate::domain::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LanePhase {
    /// No drain task owns the lane.
    Idle,
    /// A drain task owns the lane and is running or about to run its front record.
    Processing,
}

/// State kept for one key while it has (or recently had) work.
#[derive(Debug)]
pub(crate) struct LaneState {
    pub(crate) pending: VecDeque<TaskRecord>,
    pub(crate) phase: LanePhase,
    pub(crate) created_at: Instant,
    /// Last enqueue or drain completion; the idle sweep measures the grace period from here.
    pub(crate) last_activity: Instant,
    pub(crate) processed_count: u64,
}

impl LaneState {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            pending: VecDeque::new(),
            phase: LanePhase::Idle,
            created_at: now,
            last_activity: now,
            processed_count: 0,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.phase == LanePhase::Processing
    }

    /// Nothing queued and nobody draining.
    pub(crate) fn is_idle(&self) -> bool {
        self.phase == LanePhase::Idle && self.pending.is_empty()
    }

    /// Idle for at least `grace` with no intervening enqueue.
    pub(crate) fn is_reclaimable(&self, now: Instant, grace: Duration) -> bool {
        self.is_idle() && now.saturating_duration_since(self.last_activity) >= grace
    }

    pub(crate) fn oldest_pending_age(&self, now: Instant) -> Option<Duration> {
        self.pending
            .front()
            .map(|record| now.saturating_duration_since(record.enqueued_at))
    }

    /// Remove a still-pending record by id. `None` if it already started or was removed.
    pub(crate) fn take_pending(&mut self, task_id: TaskId) -> Option<TaskRecord> {
        let pos = self
            .pending
            .iter()
            .position(|record| record.task_id == task_id)?;
        self.pending.remove(pos)
    }
}
