//! App - アプリケーション層
//!
//! queue / classify / retry を組み合わせて 1 つの `App` にする。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定の検証と組み立て
//! - **ReaperLoop**: 待ち時間切れレコードの回収
//! - **GCLoop**: アイドル lane の回収

pub mod builder;
pub(crate) mod gc_loop;
pub(crate) mod reaper_loop;

pub use self::builder::{App, AppBuilder};
