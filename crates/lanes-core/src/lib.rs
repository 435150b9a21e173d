//! lanes-core
//!
//! Per-actor serial execution with uniform failure handling.
//!
//! # モジュール構成
//! - **queue**: key ごとの直列 lane（FIFO・相互排他・待ち時間タイムアウト・アイドル回収）
//! - **classify**: failure の分類（kind / severity / retryable / ユーザー向けメッセージ）
//! - **retry**: 指数バックオフ + jitter の retry executor
//! - **app**: 組み立て（AppBuilder）とバックグラウンドループ（reaper, gc）
//! - **domain**: ids と typed failure
//! - **observability**: stats スナップショット
//! - **error**: queue / config / build のエラー型

pub mod app;
pub mod classify;
pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;
pub mod retry;

pub use app::{App, AppBuilder};
pub use classify::{ErrorClassifier, ErrorRecord, ErrorResponse, SevereErrorHook};
pub use domain::{ErrorKind, ExternalFailure, Failure, LaneKey, Severity};
pub use error::{BuildError, ConfigError, QueueError, Rejection};
pub use observability::{LaneStats, QueueStats, ShutdownReport};
pub use queue::{Completion, KeyedQueue, QueueConfig};
pub use retry::{GiveUp, RetryError, RetryExecutor, RetryPolicy};
