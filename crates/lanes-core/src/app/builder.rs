//! AppBuilder - 構築とワイヤリング
//!
//! queue / classifier / retry executor をひとつずつ明示的に作って `App` に渡す。
//! グローバルなシングルトンは持たない。
//!
//! # ライフサイクル
//! - 起動時: `AppBuilder::build()` (tokio runtime の中で呼ぶ)
//! - 停止時: `App::shutdown(grace)` で drain → clear → ループ停止

use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{ErrorClassifier, SevereErrorHook};
use crate::domain::LaneKey;
use crate::error::BuildError;
use crate::observability::ShutdownReport;
use crate::queue::{Completion, KeyedQueue, QueueConfig};
use crate::retry::{RetryError, RetryExecutor, RetryPolicy};

/// AppBuilder は `App` を構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .queue_config(QueueConfig::from_env()?)
///     .severe_error_hook(|record: &ErrorRecord| page_oncall(record))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 設定は `build()` 時にまとめて検証する
/// - runtime の外で呼ばれたら `BuildError::NoRuntime`
#[derive(Default)]
pub struct AppBuilder {
    queue_config: QueueConfig,
    hook: Option<Box<dyn SevereErrorHook>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// High/Critical の failure ごとに同期的に呼ばれる
    pub fn severe_error_hook(mut self, hook: impl SevereErrorHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let classifier = Arc::new(match self.hook {
            Some(hook) => ErrorClassifier::with_hook(BoxedHook(hook)),
            None => ErrorClassifier::new(),
        });
        let queue = KeyedQueue::start(self.queue_config)?;
        let retry = RetryExecutor::new(Arc::clone(&classifier));
        Ok(App {
            queue,
            classifier,
            retry,
        })
    }
}

struct BoxedHook(Box<dyn SevereErrorHook>);

impl SevereErrorHook for BoxedHook {
    fn on_severe_error(&self, record: &crate::classify::ErrorRecord) {
        self.0.on_severe_error(record);
    }
}

/// App は queue / classifier / retry をまとめたハンドル
///
/// clone は安い (中身は Arc)
#[derive(Debug, Clone)]
pub struct App {
    pub queue: KeyedQueue,
    pub classifier: Arc<ErrorClassifier>,
    pub retry: RetryExecutor,
}

impl App {
    /// `operation` を retry で包んで `key` の lane に積む
    ///
    /// retry の待ち時間も lane を占有する (同じ key の後続は待つ)
    pub fn submit_with_retry<F, Fut, T, E>(
        &self,
        key: impl Into<LaneKey>,
        policy: RetryPolicy,
        context: serde_json::Value,
        operation: F,
    ) -> Completion<T, RetryError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Error + Send + 'static,
    {
        let retry = self.retry.clone();
        self.queue.enqueue(
            key,
            move || async move { retry.run(operation, &policy).await },
            context,
        )
    }

    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.queue.shutdown(grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorRecord;
    use crate::domain::Failure;
    use crate::error::{ConfigError, QueueError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_build_success() {
        let app = AppBuilder::new().build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_without_runtime() {
        let app = AppBuilder::new().build();
        assert!(matches!(app, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_build_invalid_config() {
        let app = AppBuilder::new()
            .queue_config(QueueConfig::default().with_wait_timeout(Duration::from_millis(10)))
            .build();
        assert!(matches!(
            app,
            Err(BuildError::Config(ConfigError::WaitTimeoutOutOfRange { .. }))
        ));
    }

    #[tokio::test]
    async fn test_hook_is_wired_into_classifier() {
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let app = AppBuilder::new()
            .severe_error_hook(move |_: &ErrorRecord| *sink.lock().unwrap() += 1)
            .build()
            .unwrap();
        app.classifier
            .handle(&Failure::storage("db down"), serde_json::Value::Null);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_with_retry_recovers_on_the_lane() {
        let app = AppBuilder::new().build().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let done = app.submit_with_retry(
            "u1",
            RetryPolicy::default(),
            serde_json::json!({"op": "reply"}),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Failure::completion_service("slow down").with_code("rate_limited"))
                    } else {
                        Ok(n)
                    }
                }
            },
        );

        assert_eq!(done.await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(app.queue.stats().total_succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_with_retry_surfaces_final_failure() {
        let app = AppBuilder::new().build().unwrap();
        let done = app.submit_with_retry(
            "u1",
            RetryPolicy::default(),
            serde_json::Value::Null,
            || async { Err::<(), _>(Failure::validation("empty message")) },
        );

        let err = done.await.unwrap_err();
        let record = app.classifier.classify(&err);
        assert_eq!(record.kind, crate::domain::ErrorKind::Validation);
        match err {
            QueueError::Operation(retry) => assert_eq!(retry.attempts(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_with_invalid_policy_is_a_typed_error() {
        let app = AppBuilder::new().build().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let done = app.submit_with_retry(
            "u1",
            RetryPolicy::default().with_max_delay(Duration::from_millis(500)),
            serde_json::Value::Null,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::network("reset").with_code("ECONNRESET")) }
            },
        );

        let err = done.await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            err,
            QueueError::Operation(RetryError::Policy(ConfigError::RetryPolicy(_)))
        ));
        assert_eq!(app.classifier.classify(&err).kind, crate::domain::ErrorKind::Validation);

        // the lane is still usable
        let next = app.submit_with_retry("u1", RetryPolicy::no_retry(), serde_json::Value::Null, || {
            async { Ok::<_, Failure>(7) }
        });
        assert_eq!(next.await.unwrap(), 7);
    }
}
