//! Domain identifiers.
//!
//! - `LaneKey`: opaque per-actor key. Equality and hashing are all the queue needs.
//! - `Id<T>`: ULID-backed id with a phantom marker, so a `TaskId` can never be passed
//!   where a `RequestId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Key that partitions work into independent FIFO lanes (one per actor).
///
/// Integer ids are normalised to their decimal string so `LaneKey::from(42)` and
/// `LaneKey::from("42")` address the same lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneKey(String);

impl LaneKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LaneKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for LaneKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&String> for LaneKey {
    fn from(key: &String) -> Self {
        Self(key.clone())
    }
}

impl From<i64> for LaneKey {
    fn from(key: i64) -> Self {
        Self(key.to_string())
    }
}

impl From<u64> for LaneKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

impl From<i32> for LaneKey {
    fn from(key: i32) -> Self {
        Self(key.to_string())
    }
}

/// Marker trait for `Id<T>`; supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID id. `T` only exists at compile time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Fresh id from the current time plus randomness.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for enqueued tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Marker for handled failures (correlates a log line with what the actor was shown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Request {}

impl IdMarker for Request {
    fn prefix() -> &'static str {
        "req-"
    }
}

pub type TaskId = Id<Task>;
pub type RequestId = Id<Request>;
