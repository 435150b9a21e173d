//! Domain model (lane keys, ids, failure taxonomy).

pub mod errors;
pub mod ids;

pub use self::errors::{BoxError, ErrorKind, ExternalFailure, Failure, Severity};
pub use self::ids::{Id, IdMarker, LaneKey, RequestId, TaskId};
