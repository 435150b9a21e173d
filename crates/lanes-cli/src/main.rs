use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lanes_core::classify::ErrorRecord;
use lanes_core::{
    AppBuilder, ErrorResponse, Failure, QueueConfig, QueueStats, RetryPolicy, ShutdownReport,
};
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` でフィルタ、`LANES_LOG_JSON=1` で JSON 出力
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LANES_LOG_JSON").is_ok_and(|v| v == "1");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    // ignore: a subscriber may already be installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// 外部サービスの代わり。失敗は collaborator 側で `Failure` に型付けして返す
#[async_trait]
trait Collaborator: Send + Sync {
    fn step(&self) -> &'static str;

    async fn call(&self, user: u64, event: u32) -> Result<String, Failure>;
}

/// 最初の数回は rate limit で落ちる completion service
struct FlakyCompletion {
    rate_limited_left: AtomicU32,
}

#[async_trait]
impl Collaborator for FlakyCompletion {
    fn step(&self) -> &'static str {
        "reply"
    }

    async fn call(&self, user: u64, event: u32) -> Result<String, Failure> {
        sleep(Duration::from_millis(20)).await;
        let left = self.rate_limited_left.load(Ordering::Relaxed);
        if left > 0 {
            self.rate_limited_left.fetch_sub(1, Ordering::Relaxed);
            return Err(Failure::completion_service(format!(
                "rate limit reached (left={left})"
            ))
            .with_code("rate_limited")
            .with_status(429));
        }
        Ok(format!("reply to user {user} event {event}"))
    }
}

/// (user, event) の一意制約を持つ record store
#[derive(Default)]
struct RecordStore {
    rows: Mutex<HashSet<(u64, u32)>>,
}

#[async_trait]
impl Collaborator for RecordStore {
    fn step(&self) -> &'static str {
        "persist"
    }

    async fn call(&self, user: u64, event: u32) -> Result<String, Failure> {
        sleep(Duration::from_millis(5)).await;
        let inserted = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((user, event));
        if !inserted {
            return Err(Failure::storage(format!(
                "duplicate key value violates unique constraint (user={user}, event={event})"
            ))
            .with_code("23505"));
        }
        Ok(format!("stored {user}/{event}"))
    }
}

/// 一度だけ 503 を返す archival service
struct Archive {
    unavailable_left: AtomicU32,
}

#[async_trait]
impl Collaborator for Archive {
    fn step(&self) -> &'static str {
        "archive"
    }

    async fn call(&self, user: u64, _event: u32) -> Result<String, Failure> {
        sleep(Duration::from_millis(30)).await;
        if self.unavailable_left.load(Ordering::Relaxed) > 0 {
            self.unavailable_left.fetch_sub(1, Ordering::Relaxed);
            return Err(Failure::archival_service("archive backend unavailable").with_status(503));
        }
        Ok(format!("archived day for user {user}"))
    }
}

#[derive(Serialize)]
struct Summary {
    stats: QueueStats,
    failures: Vec<ErrorResponse>,
    shutdown: ShutdownReport,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // (A) 設定と組み立て
    let config = QueueConfig::from_env()?;
    let app = AppBuilder::new()
        .queue_config(config)
        .severe_error_hook(|record: &ErrorRecord| {
            error!(request_id = %record.request_id, kind = %record.kind, "paging operator");
        })
        .build()?;

    let completion: Arc<dyn Collaborator> = Arc::new(FlakyCompletion {
        rate_limited_left: AtomicU32::new(2),
    });
    let store: Arc<dyn Collaborator> = Arc::new(RecordStore::default());
    let archive: Arc<dyn Collaborator> = Arc::new(Archive {
        unavailable_left: AtomicU32::new(1),
    });

    let policy = RetryPolicy::new(3, Duration::from_millis(50), Duration::from_millis(500), 0.2)?;

    // (B) user ごとの lane にイベントを積む。user 2 は event 1 を二重送信する
    let mut events: Vec<(u64, u32)> = (1..=3)
        .flat_map(|user| (1..=3).map(move |event| (user, event)))
        .collect();
    events.push((2, 1));

    let mut pending = Vec::new();
    for (user, event) in events {
        for svc in [&completion, &store] {
            let svc = Arc::clone(svc);
            let step = svc.step();
            let done = app.submit_with_retry(
                user,
                policy.clone(),
                json!({ "user": user, "event": event, "step": step }),
                move || {
                    let svc = Arc::clone(&svc);
                    async move { svc.call(user, event).await }
                },
            );
            debug!(key = %done.key(), task_id = %done.task_id(), event, step, "queued");
            pending.push((user, event, step, done));
        }
    }
    for user in 1..=3_u64 {
        let svc = Arc::clone(&archive);
        let done = app.submit_with_retry(
            "archive",
            policy.clone(),
            json!({ "user": user, "step": "archive" }),
            move || {
                let svc = Arc::clone(&svc);
                async move { svc.call(user, 0).await }
            },
        );
        pending.push((user, 0, "archive", done));
    }

    // (C) 結果を回収。失敗は classifier を通してからユーザーに見せる
    let mut failures = Vec::new();
    for (user, event, step, done) in pending {
        match done.await {
            Ok(value) => info!(user, event, step, %value, "done"),
            Err(err) => {
                let response = app
                    .classifier
                    .handle(&err, json!({ "user": user, "event": event, "step": step }));
                println!(
                    "user {user} event {event} {step}: {} (can retry: {})",
                    response.message, response.can_retry
                );
                failures.push(response);
            }
        }
    }

    // (D) 停止して stats を出す
    let stats = app.queue.stats();
    let shutdown = app.shutdown(Duration::from_secs(5)).await;
    let summary = Summary {
        stats,
        failures,
        shutdown,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
