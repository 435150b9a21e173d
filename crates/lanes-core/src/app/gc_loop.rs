//! GCLoop - アイドル lane の回収
//!
//! `idle_grace` 以上なにも起きていない lane を表から消す。
//! grace 内に enqueue が来た lane は残る (last_activity が更新されるため)。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::queue::memory::Shared;

/// Runs until `shutdown` flips to `true` or its sender is dropped.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(shared.config.reap_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tick.tick() => {
                let reclaimed = shared
                    .lock()
                    .reclaim_idle(Instant::now(), shared.config.idle_grace);
                for key in &reclaimed {
                    debug!(lane = %key, "reclaimed idle lane");
                }
            }
        }
    }
    debug!("gc loop stopped");
}
