//! Failure classification.
//!
//! Every failure that is about to reach an actor or an alert goes through
//! [`ErrorClassifier`]. A typed [`Failure`] anywhere in the source chain is used verbatim;
//! otherwise the heuristics guess from message text, status and named codes.

mod heuristics;
mod hook;
mod messages;
mod response;

use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{ErrorKind, Failure, RequestId, Severity};
use crate::error::{ConfigError, Rejection};

pub use self::hook::{LogSevereErrors, SevereErrorHook};
pub use self::response::ErrorResponse;

/// Normalised description of one failure. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub request_id: RequestId,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub code: Option<String>,
    pub status: Option<u16>,
    /// Rendered original failure. Logged, never shown to the actor.
    pub cause: String,
    pub timestamp: DateTime<Utc>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ErrorRecord {
    fn new(kind: ErrorKind, cause: String) -> Self {
        Self {
            request_id: RequestId::generate(),
            kind,
            severity: kind.default_severity(),
            retryable: false,
            code: None,
            status: None,
            cause,
            timestamp: Utc::now(),
            context: serde_json::Map::new(),
        }
    }

    /// Merge caller context. Objects are merged key by key; anything else lands under
    /// `"context"`.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        match context {
            serde_json::Value::Object(map) => self.context.extend(map),
            serde_json::Value::Null => {}
            other => {
                self.context.insert("context".to_owned(), other);
            }
        }
        self
    }
}

/// Codes that are never worth another attempt, whatever the kind.
const NEVER_RETRY: &[&str] = &[
    "invalid_api_key",
    "insufficient_quota",
    "23505",
    "42P01",
    Rejection::TIMEOUT_CODE,
    Rejection::CLEARED_CODE,
    Rejection::CLOSED_CODE,
];

const TRANSIENT: &[&str] = &[
    "rate_limited",
    "429",
    "service_unavailable",
    "500",
    "502",
    "503",
    "504",
    "408",
    "timeout",
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "EAI_AGAIN",
];

/// serialization_failure, deadlock_detected, admin_shutdown, connection_failure,
/// sqlclient_unable_to_establish_sqlconnection
const STORAGE_TRANSIENT: &[&str] = &["40001", "40P01", "57P01", "08006", "08001"];

/// Kind default plus per-code and per-status overrides.
pub fn retryable_for(kind: ErrorKind, code: Option<&str>, status: Option<u16>) -> bool {
    if code.is_some_and(|c| NEVER_RETRY.contains(&c)) {
        return false;
    }
    if matches!(status, Some(400 | 401 | 403 | 404 | 422)) {
        return false;
    }
    if matches!(kind, ErrorKind::Validation | ErrorKind::Authentication) {
        return false;
    }
    if code.is_some_and(|c| TRANSIENT.contains(&c))
        || matches!(status, Some(408 | 429 | 500 | 502 | 503 | 504))
    {
        return true;
    }
    match kind {
        ErrorKind::Storage => code.is_some_and(|c| STORAGE_TRANSIENT.contains(&c)),
        ErrorKind::Network | ErrorKind::CompletionService | ErrorKind::TransportService => true,
        ErrorKind::ArchivalService | ErrorKind::Unknown => false,
        ErrorKind::Validation | ErrorKind::Authentication => false,
    }
}

fn escalate(kind: ErrorKind, code: Option<&str>) -> Severity {
    match code {
        // the service is unusable until someone acts
        Some("invalid_api_key" | "insufficient_quota" | "42P01") => Severity::Critical,
        _ => kind.default_severity(),
    }
}

pub struct ErrorClassifier {
    hook: Arc<dyn SevereErrorHook>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::with_hook(LogSevereErrors)
    }

    pub fn with_hook(hook: impl SevereErrorHook + 'static) -> Self {
        Self {
            hook: Arc::new(hook),
        }
    }

    /// Map any failure onto the closed taxonomy. No side effects.
    pub fn classify(&self, err: &(dyn Error + 'static)) -> ErrorRecord {
        let cause = err.to_string();

        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(failure) = e.downcast_ref::<Failure>() {
                return Self::from_failure(failure, cause);
            }
            if let Some(rejection) = e.downcast_ref::<Rejection>() {
                return Self::from_rejection(rejection, cause);
            }
            if e.downcast_ref::<ConfigError>().is_some() {
                return ErrorRecord::new(ErrorKind::Validation, cause);
            }
            current = e.source();
        }

        let evidence = heuristics::Evidence::gather(err);
        let (kind, code) = heuristics::infer(&evidence);
        let mut record = ErrorRecord::new(kind, cause);
        record.severity = escalate(kind, code.as_deref());
        record.retryable = retryable_for(kind, code.as_deref(), evidence.status);
        record.status = evidence.status;
        record.code = code;
        record
    }

    fn from_failure(failure: &Failure, cause: String) -> ErrorRecord {
        let code = failure.code.as_deref();
        let mut record = ErrorRecord::new(failure.kind, cause);
        record.severity = failure
            .severity
            .unwrap_or_else(|| escalate(failure.kind, code));
        record.retryable = failure
            .retryable
            .unwrap_or_else(|| retryable_for(failure.kind, code, failure.status));
        record.code = failure.code.clone();
        record.status = failure.status;
        record
    }

    fn from_rejection(rejection: &Rejection, cause: String) -> ErrorRecord {
        let mut record = ErrorRecord::new(ErrorKind::Unknown, cause);
        record.severity = match rejection {
            Rejection::Timeout { .. } => Severity::Medium,
            Rejection::Cleared { .. } | Rejection::Closed => Severity::Low,
        };
        record.code = Some(rejection.code().to_owned());
        record
    }

    /// Safe text for the actor. Never includes the cause.
    pub fn user_message(&self, record: &ErrorRecord) -> &'static str {
        messages::user_message(record)
    }

    pub fn is_retryable(&self, record: &ErrorRecord) -> bool {
        record.retryable
    }

    /// Operator-facing hint.
    pub fn suggested_action(&self, record: &ErrorRecord) -> &'static str {
        messages::suggested_action(record)
    }

    /// Classify, log at the record's severity, alert on `High`/`Critical`, and build the
    /// response for the actor.
    pub fn handle(&self, err: &(dyn Error + 'static), context: serde_json::Value) -> ErrorResponse {
        let record = self.classify(err).with_context(context);
        let context = serde_json::Value::Object(record.context.clone());

        match record.severity {
            Severity::Low => info!(
                request_id = %record.request_id,
                kind = %record.kind,
                code = record.code.as_deref().unwrap_or("-"),
                %context,
                cause = %record.cause,
                "handled failure"
            ),
            Severity::Medium => warn!(
                request_id = %record.request_id,
                kind = %record.kind,
                code = record.code.as_deref().unwrap_or("-"),
                %context,
                cause = %record.cause,
                "handled failure"
            ),
            Severity::High | Severity::Critical => error!(
                request_id = %record.request_id,
                kind = %record.kind,
                severity = %record.severity,
                code = record.code.as_deref().unwrap_or("-"),
                %context,
                cause = %record.cause,
                "handled failure"
            ),
        }

        if record.severity.is_severe() {
            let hook = AssertUnwindSafe(|| self.hook.on_severe_error(&record));
            if catch_unwind(hook).is_err() {
                error!(request_id = %record.request_id, "severe error hook panicked");
            }
        }

        ErrorResponse {
            success: false,
            request_id: record.request_id,
            kind: record.kind,
            severity: record.severity,
            message: self.user_message(&record).to_owned(),
            can_retry: record.retryable,
            suggested_action: self.suggested_action(&record).to_owned(),
            timestamp: record.timestamp,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}
