use tracing::error;

use super::ErrorRecord;

/// Alerting seam for `High`/`Critical` failures.
///
/// Called synchronously from [`ErrorClassifier::handle`](super::ErrorClassifier::handle) with
/// the full record. Implementations must not panic; a panic is caught and logged.
pub trait SevereErrorHook: Send + Sync {
    fn on_severe_error(&self, record: &ErrorRecord);
}

impl<F> SevereErrorHook for F
where
    F: Fn(&ErrorRecord) + Send + Sync,
{
    fn on_severe_error(&self, record: &ErrorRecord) {
        self(record)
    }
}

/// Default hook: one `error!` line per severe failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSevereErrors;

impl SevereErrorHook for LogSevereErrors {
    fn on_severe_error(&self, record: &ErrorRecord) {
        error!(
            request_id = %record.request_id,
            kind = %record.kind,
            severity = %record.severity,
            code = record.code.as_deref().unwrap_or("-"),
            cause = %record.cause,
            "severe failure"
        );
    }
}
