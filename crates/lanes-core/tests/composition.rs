use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanes_core::classify::ErrorRecord;
use lanes_core::{
    AppBuilder, ErrorKind, Failure, GiveUp, QueueConfig, QueueError, RetryPolicy, Severity,
};
use serde_json::json;
use tokio::time::{Instant, sleep};

fn fast_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn retries_hold_the_lane_and_keep_fifo() {
    let app = AppBuilder::new().build().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicU32::new(0));

    let (log, counter) = (Arc::clone(&order), Arc::clone(&calls));
    let first = app.submit_with_retry("u1", fast_policy(), json!({"op": 1}), move || {
        let log = Arc::clone(&log);
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                return Err(Failure::network("connection reset").with_code("ECONNRESET"));
            }
            log.lock().unwrap().push(1);
            Ok(1)
        }
    });
    let log = Arc::clone(&order);
    let second = app.submit_with_retry("u1", fast_policy(), json!({"op": 2}), move || {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(2);
            Ok::<_, Failure>(2)
        }
    });

    assert_eq!(second.await.unwrap(), 2);
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn other_keys_are_not_blocked_by_a_stuck_key() {
    let app = AppBuilder::new().build().unwrap();
    let started = Instant::now();

    let stuck = app.queue.enqueue(
        "slow-user",
        || async {
            sleep(Duration::from_secs(20)).await;
            Ok::<_, Failure>(())
        },
        json!(null),
    );
    let quick = app.queue.enqueue("fast-user", || async { Ok::<_, Failure>("hi") }, json!(null));

    assert_eq!(quick.await.unwrap(), "hi");
    assert!(started.elapsed() < Duration::from_secs(1));
    stuck.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timed_out_record_is_reported_as_never_ran() {
    let app = AppBuilder::new()
        .queue_config(QueueConfig::default().with_wait_timeout(Duration::from_secs(2)))
        .build()
        .unwrap();

    let blocker = app.queue.enqueue(
        "u1",
        || async {
            sleep(Duration::from_secs(10)).await;
            Ok::<_, Failure>(())
        },
        json!(null),
    );
    let ran = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ran);
    let starved = app.submit_with_retry("u1", fast_policy(), json!({"op": "reply"}), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Failure>(()) }
    });

    let err = starved.await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let response = app.classifier.handle(&err, json!({"user": "u1"}));
    assert_eq!(response.kind, ErrorKind::Unknown);
    assert!(!response.can_retry);

    blocker.await.unwrap();
    assert_eq!(app.queue.stats().timeout_count, 1);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_is_classified_at_the_boundary() {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alerts);
    let app = AppBuilder::new()
        .severe_error_hook(move |record: &ErrorRecord| sink.lock().unwrap().push(record.kind))
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let done = app.submit_with_retry("u7", fast_policy(), json!(null), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(Failure::storage("duplicate row").with_code("23505")) }
    });

    let err = done.await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match &err {
        QueueError::Operation(retry) => {
            assert_eq!(retry.reason(), Some(GiveUp::NotRetryable));
        }
        other => panic!("unexpected {other:?}"),
    }

    let response = app.classifier.handle(&err, json!({"user": "u7"}));
    assert_eq!(response.kind, ErrorKind::Storage);
    assert_eq!(response.severity, Severity::High);
    assert_eq!(response.message, "This record already exists.");
    assert_eq!(*alerts.lock().unwrap(), vec![ErrorKind::Storage]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_late_submissions() {
    let app = AppBuilder::new().build().unwrap();
    let report = app.shutdown(Duration::from_secs(1)).await;
    assert!(report.drained);
    assert_eq!(report.cleared, 0);

    let late = app.submit_with_retry("u1", fast_policy(), json!(null), || async {
        Ok::<_, Failure>(())
    });
    let err = late.await.unwrap_err();
    assert_eq!(err.rejection().map(|r| r.code()), Some("QUEUE_CLOSED"));
}
