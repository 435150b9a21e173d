//! In-memory keyed serial queue.

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{QueueConfig, check_wait_timeout};
use super::job::{self, Completion, JobOutcome};
use super::state::{LanePhase, LaneState};
use super::TaskRecord;
use crate::app::{gc_loop, reaper_loop};
use crate::domain::{LaneKey, TaskId};
use crate::error::{BuildError, ConfigError, Rejection};
use crate::observability::{LaneStats, QueueStats, ShutdownReport};

/// Deadline entry for the timeout reaper's min-heap.
///
/// Entries are never removed when a record starts; the reaper discards entries whose record
/// is no longer pending.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Deadline {
    at: Instant,
    task_id: TaskId,
    key: LaneKey,
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earliest deadline on top
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: u64,
    failed: u64,
    max_depth_observed: usize,
    timeouts: u64,
    cleared: u64,
}

/// Outcome of appending a record to a lane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pushed {
    pub depth: usize,
    /// The lane was idle; the caller must start a drain task for it.
    pub start_drain: bool,
}

/// A record removed by the timeout reaper, to be rejected outside the lock.
#[derive(Debug)]
pub(crate) struct Eviction {
    pub key: LaneKey,
    pub record: TaskRecord,
    pub waited: Duration,
}

/// Everything behind the queue's single mutex. The lock is never held across an `.await`.
#[derive(Debug)]
pub(crate) struct LaneTable {
    lanes: HashMap<LaneKey, LaneState>,
    deadlines: BinaryHeap<Deadline>,
    wait_timeout: Duration,
    counters: Counters,
    closed: bool,
}

impl LaneTable {
    fn new(wait_timeout: Duration) -> Self {
        Self {
            lanes: HashMap::new(),
            deadlines: BinaryHeap::new(),
            wait_timeout,
            counters: Counters::default(),
            closed: false,
        }
    }

    pub(crate) fn push(&mut self, key: &LaneKey, record: TaskRecord, now: Instant) -> Pushed {
        self.deadlines.push(Deadline {
            at: record.deadline,
            task_id: record.task_id,
            key: key.clone(),
        });

        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| LaneState::new(now));
        lane.last_activity = now;
        lane.pending.push_back(record);

        let depth = lane.depth();
        let start_drain = lane.phase == LanePhase::Idle;
        if start_drain {
            lane.phase = LanePhase::Processing;
        }

        if depth > self.counters.max_depth_observed {
            self.counters.max_depth_observed = depth;
        }

        Pushed { depth, start_drain }
    }

    /// Pop the lane's front record, or release ownership of the lane if nothing is left.
    pub(crate) fn next_for(&mut self, key: &LaneKey, now: Instant) -> Option<TaskRecord> {
        let lane = self.lanes.get_mut(key)?;
        let next = lane.pending.pop_front();
        if next.is_none() {
            lane.phase = LanePhase::Idle;
            lane.last_activity = now;
        }
        next
    }

    pub(crate) fn finish(&mut self, key: &LaneKey, outcome: JobOutcome, now: Instant) {
        match outcome {
            JobOutcome::Succeeded => self.counters.succeeded += 1,
            JobOutcome::Failed => self.counters.failed += 1,
        }
        if let Some(lane) = self.lanes.get_mut(key) {
            lane.processed_count += 1;
            lane.last_activity = now;
        }
    }

    pub(crate) fn evict_expired(&mut self, now: Instant) -> Vec<Eviction> {
        let mut evicted = Vec::new();
        while let Some(entry) = self.deadlines.peek() {
            if entry.at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.deadlines.pop() else {
                break;
            };
            let Some(lane) = self.lanes.get_mut(&entry.key) else {
                continue;
            };
            // already started or cleared
            let Some(record) = lane.take_pending(entry.task_id) else {
                continue;
            };
            self.counters.timeouts += 1;
            evicted.push(Eviction {
                waited: record.waited(now),
                key: entry.key,
                record,
            });
        }
        evicted
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|entry| entry.at)
    }

    /// Take every pending record. Lanes with a running drain are kept so that drain still
    /// owns them; idle lanes are dropped.
    fn clear_pending(&mut self) -> Vec<(LaneKey, TaskRecord)> {
        let mut cleared = Vec::new();
        for (key, lane) in &mut self.lanes {
            cleared.extend(lane.pending.drain(..).map(|record| (key.clone(), record)));
        }
        self.lanes.retain(|_, lane| lane.is_processing());
        self.deadlines.clear();
        self.counters.cleared += cleared.len() as u64;
        cleared
    }

    pub(crate) fn reclaim_idle(&mut self, now: Instant, grace: Duration) -> Vec<LaneKey> {
        let mut reclaimed = Vec::new();
        self.lanes.retain(|key, lane| {
            let reclaim = lane.is_reclaimable(now, grace);
            if reclaim {
                reclaimed.push(key.clone());
            }
            !reclaim
        });
        reclaimed
    }

    fn is_idle(&self) -> bool {
        self.lanes.values().all(LaneState::is_idle)
    }

    fn snapshot(&self, now: Instant) -> QueueStats {
        let mut lanes: Vec<LaneStats> = self
            .lanes
            .iter()
            .map(|(key, lane)| LaneStats {
                key: key.clone(),
                depth: lane.depth(),
                processing: lane.is_processing(),
                processed_count: lane.processed_count,
                age_ms: millis(now.saturating_duration_since(lane.created_at)),
                oldest_pending_age_ms: lane.oldest_pending_age(now).map(millis),
            })
            .collect();
        lanes.sort_by(|a, b| a.key.cmp(&b.key));

        QueueStats {
            total_processed: self.counters.succeeded + self.counters.failed,
            total_succeeded: self.counters.succeeded,
            total_failed: self.counters.failed,
            active_keys: self.lanes.len(),
            max_depth_observed: self.counters.max_depth_observed,
            timeout_count: self.counters.timeouts,
            cleared_count: self.counters.cleared,
            wait_timeout_ms: millis(self.wait_timeout),
            lanes,
            taken_at: Utc::now(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// State shared by the queue handle, drain tasks and background loops.
#[derive(Debug)]
pub(crate) struct Shared {
    table: Mutex<LaneTable>,
    pub(crate) config: QueueConfig,
    handle: Handle,
    /// Pinged on every enqueue so the reaper can re-arm for an earlier deadline.
    pub(crate) deadline_changed: Notify,
    /// Pinged whenever a lane may have become idle.
    idle: Notify,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, LaneTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background loop handles.
/// - `shutdown_tx` を drop するとループも止まる (最後の `KeyedQueue` が drop されたとき)
struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// Keyed serial queue.
///
/// - Operations sharing a key run one at a time, in enqueue order.
/// - Different keys run independently.
/// - A record that has not started within the wait timeout is rejected with
///   [`Rejection::Timeout`]; the lane carries on with the next record.
/// - A failing operation never blocks its lane.
///
/// Cloning is cheap; clones share the same lanes.
#[derive(Clone)]
pub struct KeyedQueue {
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
}

impl KeyedQueue {
    /// Build the queue and spawn its background loops on the current tokio runtime.
    pub fn start(config: QueueConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let shared = Arc::new(Shared {
            table: Mutex::new(LaneTable::new(config.wait_timeout)),
            config,
            handle: handle.clone(),
            deadline_changed: Notify::new(),
            idle: Notify::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loops = vec![
            handle.spawn(reaper_loop::run(Arc::clone(&shared), shutdown_rx.clone())),
            handle.spawn(gc_loop::run(Arc::clone(&shared), shutdown_rx)),
        ];

        info!(
            wait_timeout_ms = millis(shared.config.wait_timeout),
            idle_grace_ms = millis(shared.config.idle_grace),
            "keyed queue started"
        );

        Ok(Self {
            shared,
            lifecycle: Arc::new(Lifecycle {
                shutdown_tx,
                loops: Mutex::new(loops),
            }),
        })
    }

    /// Append `operation` to `key`'s lane and return a future for its result.
    ///
    /// The record is queued before this returns, so calling `enqueue` twice in a row fixes
    /// the order of the two operations even if neither future has been polled.
    /// `context` is attached to log lines only.
    pub fn enqueue<F, Fut, T, E>(
        &self,
        key: impl Into<LaneKey>,
        operation: F,
        context: serde_json::Value,
    ) -> Completion<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let key = key.into();
        let task_id = TaskId::generate();
        let (job, completion) = job::prepare(key.clone(), task_id, operation);
        let now = Instant::now();

        let mut table = self.shared.lock();
        if table.closed {
            drop(table);
            debug!(lane = %key, task = %task_id, "enqueue after close");
            job.reject(Rejection::Closed);
            return completion;
        }
        let record = TaskRecord::new(task_id, job, context, now, table.wait_timeout);
        let pushed = table.push(&key, record, now);
        drop(table);

        self.shared.deadline_changed.notify_one();

        if pushed.depth > self.shared.config.backlog_warn_threshold {
            warn!(lane = %key, depth = pushed.depth, "lane backlog");
        }
        debug!(lane = %key, task = %task_id, depth = pushed.depth, "enqueued");

        if pushed.start_drain {
            self.shared
                .handle
                .spawn(drain_lane(Arc::clone(&self.shared), key));
        }

        completion
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().snapshot(Instant::now())
    }

    /// Reject every pending record with [`Rejection::Cleared`]. Running operations are not
    /// touched. Returns the number rejected.
    pub fn clear_all(&self) -> usize {
        let cleared = self.shared.lock().clear_pending();
        let count = cleared.len();
        for (key, record) in cleared {
            let task_id = record.task_id;
            record.into_job().reject(Rejection::Cleared { key, task_id });
        }
        self.shared.idle.notify_waiters();
        if count > 0 {
            info!(count, "cleared pending tasks");
        }
        count
    }

    /// Set the wait timeout for records enqueued from now on (1s to 5min).
    pub fn configure_timeout(&self, timeout: Duration) -> Result<(), ConfigError> {
        check_wait_timeout(timeout)?;
        self.shared.lock().wait_timeout = timeout;
        info!(wait_timeout_ms = millis(timeout), "queue wait timeout updated");
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        self.shared.lock().wait_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Wait until no lane is running or holding pending records. Returns `false` if
    /// `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.lock().is_idle() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let idle = self.shared.lock().is_idle();
                if !idle {
                    warn!(timeout_ms = millis(timeout), "lanes still busy after wait");
                }
                return idle;
            }
        }
    }

    /// Close the queue, give in-flight and queued work `grace` to finish, reject whatever
    /// is left, and stop the background loops.
    ///
    /// Enqueues after this point settle immediately with [`Rejection::Closed`].
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.shared.lock().closed = true;
        info!(grace_ms = millis(grace), "keyed queue shutting down");

        let drained = self.wait_idle(grace).await;
        let cleared = self.clear_all();

        // ignore send error: loops may already have stopped
        let _ = self.lifecycle.shutdown_tx.send(true);
        let loops = std::mem::take(
            &mut *self
                .lifecycle
                .loops
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for join in loops {
            let _ = join.await;
        }

        info!(drained, cleared, "keyed queue stopped");
        ShutdownReport { drained, cleared }
    }
}

impl std::fmt::Debug for KeyedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedQueue")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Single owner of `key`'s lane while its phase is `Processing`.
async fn drain_lane(shared: Arc<Shared>, key: LaneKey) {
    debug!(lane = %key, "drain started");
    loop {
        let next = shared.lock().next_for(&key, Instant::now());
        let Some(record) = next else {
            break;
        };

        let task_id = record.task_id;
        debug!(
            lane = %key,
            task = %task_id,
            waited_ms = millis(record.waited(Instant::now())),
            context = %record.context,
            "running task"
        );

        // Run on its own task so a panicking operation cannot take the lane down with it.
        let outcome = match tokio::spawn(record.into_job().run()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(lane = %key, task = %task_id, error = %err, "task aborted");
                JobOutcome::Failed
            }
        };
        if outcome == JobOutcome::Failed {
            debug!(lane = %key, task = %task_id, "task failed");
        }

        shared.lock().finish(&key, outcome, Instant::now());

        // let other lanes' drains in before taking the next record
        tokio::task::yield_now().await;
    }
    shared.idle.notify_waiters();
    debug!(lane = %key, "drain finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    type Never = std::convert::Infallible;

    fn queue() -> KeyedQueue {
        KeyedQueue::start(QueueConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn start_outside_runtime_fails() {
        let result = std::thread::spawn(|| KeyedQueue::start(QueueConfig::default()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_settles_in_enqueue_order() {
        let q = queue();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let a = q.enqueue(
            "u1",
            move || async move {
                sleep(Duration::from_millis(50)).await;
                o.lock().unwrap().push("a");
                Ok::<_, Never>("a")
            },
            json!({"op": "a"}),
        );
        let o = Arc::clone(&order);
        let b = q.enqueue(
            "u1",
            move || async move {
                sleep(Duration::from_millis(10)).await;
                o.lock().unwrap().push("b");
                Ok::<_, Never>("b")
            },
            json!({"op": "b"}),
        );

        // await b first: it still cannot finish before a
        assert_eq!(b.await.unwrap(), "b");
        assert_eq!(a.await.unwrap(), "a");
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_never_overlaps_across_interleaved_keys() {
        let q = queue();
        let busy = [Arc::new(AtomicBool::new(false)), Arc::new(AtomicBool::new(false))];
        let overlaps = Arc::new(AtomicUsize::new(0));
        let cross_key_overlap = Arc::new(AtomicBool::new(false));

        let mut completions = Vec::new();
        for i in 0..20_u64 {
            let lane = (i % 2) as usize;
            let mine = Arc::clone(&busy[lane]);
            let other = Arc::clone(&busy[1 - lane]);
            let overlaps = Arc::clone(&overlaps);
            let cross = Arc::clone(&cross_key_overlap);
            completions.push(q.enqueue(
                format!("user-{lane}"),
                move || async move {
                    if mine.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    if other.load(Ordering::SeqCst) {
                        cross.store(true, Ordering::SeqCst);
                    }
                    sleep(Duration::from_millis(5 + (i % 3) * 7)).await;
                    mine.store(false, Ordering::SeqCst);
                    Ok::<_, Never>(i)
                },
                serde_json::Value::Null,
            ));
        }

        for c in completions {
            c.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(cross_key_overlap.load(Ordering::SeqCst), "keys should interleave");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_block_the_lane() {
        let q = queue();
        let failed = q.enqueue(
            "u1",
            || async { Err::<(), _>(std::io::Error::other("boom")) },
            serde_json::Value::Null,
        );
        let next = q.enqueue("u1", || async { Ok::<_, std::io::Error>(2) }, serde_json::Value::Null);

        assert!(matches!(failed.await, Err(QueueError::Operation(_))));
        assert_eq!(next.await.unwrap(), 2);

        let stats = q.stats();
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_is_abandoned_and_lane_continues() {
        let q = queue();
        let boom = q.enqueue(
            "u1",
            || async {
                if true {
                    panic!("operation exploded");
                }
                Ok::<(), Never>(())
            },
            serde_json::Value::Null,
        );
        let next = q.enqueue("u1", || async { Ok::<_, Never>("after") }, serde_json::Value::Null);

        assert!(matches!(boom.await, Err(QueueError::Abandoned)));
        assert_eq!(next.await.unwrap(), "after");
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_record_times_out_and_lane_recovers() {
        let q = KeyedQueue::start(QueueConfig::default().with_wait_timeout(Duration::from_secs(1)))
            .unwrap();
        let started = Instant::now();

        let slow = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_secs(5)).await;
                Ok::<_, Never>("slow")
            },
            serde_json::Value::Null,
        );
        let starved = q.enqueue("u1", || async { Ok::<_, Never>("starved") }, serde_json::Value::Null);

        let err = starved.await.unwrap_err();
        assert!(err.is_timeout());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(5));

        assert_eq!(slow.await.unwrap(), "slow");
        let later = q.enqueue("u1", || async { Ok::<_, Never>("later") }, serde_json::Value::Null);
        assert_eq!(later.await.unwrap(), "later");

        let stats = q.stats();
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.total_processed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn running_operation_is_not_bounded_by_wait_timeout() {
        let q = KeyedQueue::start(QueueConfig::default().with_wait_timeout(Duration::from_secs(1)))
            .unwrap();
        let long = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_secs(10)).await;
                Ok::<_, Never>(())
            },
            serde_json::Value::Null,
        );
        assert!(long.await.is_ok());
        assert_eq!(q.stats().timeout_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_rejects_pending_exactly_once() {
        let q = queue();
        let gate = Arc::new(Notify::new());

        let g = Arc::clone(&gate);
        let running = q.enqueue(
            "u1",
            move || async move {
                g.notified().await;
                Ok::<_, Never>("ran")
            },
            serde_json::Value::Null,
        );
        let p1 = q.enqueue("u1", || async { Ok::<_, Never>("p1") }, serde_json::Value::Null);
        let p2 = q.enqueue("u2", || async { Ok::<_, Never>("p2") }, serde_json::Value::Null);
        let p3 = q.enqueue("u1", || async { Ok::<_, Never>("p3") }, serde_json::Value::Null);

        // let the drains pick up their front records
        sleep(Duration::from_millis(1)).await;

        assert_eq!(q.clear_all(), 2);
        assert_eq!(q.clear_all(), 0);

        for pending in [p1, p3] {
            let err = pending.await.unwrap_err();
            assert_eq!(err.rejection().map(Rejection::code), Some("QUEUE_CLEARED"));
        }
        // u2's only record had already started
        assert_eq!(p2.await.unwrap(), "p2");

        gate.notify_one();
        assert_eq!(running.await.unwrap(), "ran");
        assert_eq!(q.stats().cleared_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_depth_and_oldest_age() {
        let q = queue();
        let gate = Arc::new(Notify::new());
        let g = Arc::clone(&gate);
        let first = q.enqueue(
            "u1",
            move || async move {
                g.notified().await;
                Ok::<_, Never>(())
            },
            serde_json::Value::Null,
        );
        let rest: Vec<_> = (0..3)
            .map(|_| q.enqueue("u1", || async { Ok::<_, Never>(()) }, serde_json::Value::Null))
            .collect();

        sleep(Duration::from_millis(250)).await;
        let stats = q.stats();
        let lane = stats.lane(&LaneKey::from("u1")).unwrap();
        assert_eq!(lane.depth, 3);
        assert_eq!(stats.pending_total(), 3);
        assert!(lane.processing);
        assert!(lane.oldest_pending_age_ms.unwrap() >= 250);
        assert_eq!(stats.active_keys, 1);
        assert_eq!(stats.max_depth_observed, 4);

        gate.notify_one();
        first.await.unwrap();
        for c in rest {
            c.await.unwrap();
        }
        assert_eq!(q.stats().lane(&LaneKey::from("u1")).unwrap().processed_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_lane_is_reclaimed_after_grace() {
        let q = KeyedQueue::start(
            QueueConfig::default()
                .with_idle_grace(Duration::from_secs(60))
                .with_reap_interval(Duration::from_secs(5)),
        )
        .unwrap();
        q.enqueue("u1", || async { Ok::<_, Never>(()) }, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(q.stats().active_keys, 1);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(q.stats().active_keys, 1, "still inside grace period");

        sleep(Duration::from_secs(40)).await;
        assert_eq!(q.stats().active_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_within_grace_keeps_the_lane() {
        let q = KeyedQueue::start(
            QueueConfig::default()
                .with_idle_grace(Duration::from_secs(60))
                .with_reap_interval(Duration::from_secs(5)),
        )
        .unwrap();
        q.enqueue("u1", || async { Ok::<_, Never>(()) }, serde_json::Value::Null)
            .await
            .unwrap();
        sleep(Duration::from_secs(50)).await;
        q.enqueue("u1", || async { Ok::<_, Never>(()) }, serde_json::Value::Null)
            .await
            .unwrap();
        sleep(Duration::from_secs(30)).await;

        let stats = q.stats();
        assert_eq!(stats.active_keys, 1);
        assert_eq!(stats.lane(&LaneKey::from("u1")).unwrap().processed_count, 2);
    }

    #[tokio::test]
    async fn configure_timeout_is_bounded() {
        let q = queue();
        assert!(q.configure_timeout(Duration::from_millis(500)).is_err());
        assert!(q.configure_timeout(Duration::from_secs(301)).is_err());
        q.configure_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(q.wait_timeout(), Duration::from_secs(5));
        assert_eq!(q.stats().wait_timeout_ms, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_change_applies_to_new_records_only() {
        let q = queue();
        let started = Instant::now();
        let blocker = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_secs(20)).await;
                Ok::<_, Never>("blocker")
            },
            serde_json::Value::Null,
        );
        let old = q.enqueue("u1", || async { Ok::<_, Never>("old") }, serde_json::Value::Null);
        let old_id = old.task_id();

        q.configure_timeout(Duration::from_secs(1)).unwrap();
        let new = q.enqueue("u1", || async { Ok::<_, Never>("new") }, serde_json::Value::Null);
        let new_id = new.task_id();
        assert_eq!(new.key(), old.key());
        assert_ne!(new_id, old_id);

        let err = new.await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err.rejection() {
            Some(Rejection::Timeout {
                task_id, timeout, ..
            }) => {
                assert_eq!(*task_id, new_id);
                assert_eq!(*timeout, Duration::from_secs(1));
            }
            other => panic!("unexpected {other:?}"),
        }

        // the earlier record keeps its 30s deadline and is still waiting
        sleep(Duration::from_secs(2)).await;
        let stats = q.stats();
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.lane(&LaneKey::from("u1")).unwrap().depth, 1);

        assert_eq!(blocker.await.unwrap(), "blocker");
        assert_eq!(old.await.unwrap(), "old");
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(q.stats().timeout_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_reports_busy_lanes() {
        let q = queue();
        let slow = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_secs(3)).await;
                Ok::<_, Never>(())
            },
            serde_json::Value::Null,
        );
        assert!(!q.wait_idle(Duration::from_secs(1)).await);
        assert!(q.wait_idle(Duration::from_secs(5)).await);
        slow.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_then_rejects_new_work() {
        let q = queue();
        let work = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_millis(200)).await;
                Ok::<_, Never>("done")
            },
            serde_json::Value::Null,
        );

        let report = q.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport { drained: true, cleared: 0 });
        assert_eq!(work.await.unwrap(), "done");

        assert!(q.is_closed());
        let late = q.enqueue("u1", || async { Ok::<_, Never>("late") }, serde_json::Value::Null);
        assert_eq!(late.await.unwrap_err().rejection(), Some(&Rejection::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_what_grace_could_not_drain() {
        let q = queue();
        let stuck = q.enqueue(
            "u1",
            || async {
                sleep(Duration::from_secs(120)).await;
                Ok::<_, Never>(())
            },
            serde_json::Value::Null,
        );
        let queued = q.enqueue("u1", || async { Ok::<_, Never>(()) }, serde_json::Value::Null);

        let report = q.shutdown(Duration::from_secs(2)).await;
        assert!(!report.drained);
        assert_eq!(report.cleared, 1);
        assert!(queued.await.is_err());
        stuck.await.unwrap();
    }
}
