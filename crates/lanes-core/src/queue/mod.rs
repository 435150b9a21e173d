//! Keyed serial queue.
//!
//! One lane per key. Each lane runs its operations one at a time in enqueue order, while
//! lanes run independently of each other.

mod config;
mod job;
pub(crate) mod memory;
mod record;
mod state;

pub use self::config::{MAX_WAIT_TIMEOUT, MIN_WAIT_TIMEOUT, QueueConfig};
pub(crate) use self::config::duration_ms;
pub use self::job::Completion;
pub use self::memory::KeyedQueue;
pub(crate) use self::record::TaskRecord;
