use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, RequestId, Severity};

/// What a failed actor-facing call hands back: safe to serialise and show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub request_id: RequestId,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub can_retry: bool,
    pub suggested_action: String,
    pub timestamp: DateTime<Utc>,
}
