//! ReaperLoop - 待ち時間切れレコードの回収
//!
//! 期限 (enqueued_at + wait_timeout) を過ぎてもまだ開始していないレコードを lane から外し、
//! `Rejection::Timeout` で settle する。実行中のオペレーションには触らない。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Rejection;
use crate::queue::memory::Shared;

/// Runs until `shutdown` flips to `true` or its sender is dropped.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!("reaper loop started");
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown.borrow() {
            break;
        }

        let now = Instant::now();
        let (evicted, next) = {
            let mut table = shared.lock();
            let evicted = table.evict_expired(now);
            (evicted, table.next_deadline())
        };

        // settle はロックの外で
        for eviction in evicted {
            let timeout = eviction.record.deadline - eviction.record.enqueued_at;
            let task_id = eviction.record.task_id;
            warn!(
                lane = %eviction.key,
                task = %task_id,
                waited_ms = eviction.waited.as_millis() as u64,
                context = %eviction.record.context,
                "task timed out waiting for its lane"
            );
            eviction.record.into_job().reject(Rejection::Timeout {
                key: eviction.key,
                task_id,
                waited: eviction.waited,
                timeout,
            });
        }

        // 次の期限 / 新しい enqueue / shutdown のどれかまで寝る
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.deadline_changed.notified() => {}
            _ = sleep_until_deadline(next) => {}
        }
    }
    debug!("reaper loop stopped");
}

async fn sleep_until_deadline(next: Option<Instant>) {
    match next {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
