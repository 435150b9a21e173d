//! Actor-facing messages and operator hints.
//!
//! Nothing rendered here may include the raw cause.

use crate::domain::ErrorKind;
use crate::error::Rejection;

use super::ErrorRecord;

pub(crate) fn user_message(record: &ErrorRecord) -> &'static str {
    if let Some(message) = record.code.as_deref().and_then(|code| by_code(record.kind, code)) {
        return message;
    }
    match record.kind {
        ErrorKind::Storage => "We couldn't save or load your data just now. Please try again in a moment.",
        ErrorKind::CompletionService => {
            "The assistant is temporarily unavailable. Please try again shortly."
        }
        ErrorKind::Network => "There was a network problem. Please try again.",
        ErrorKind::Validation => {
            "Some of the information provided is invalid. Please check it and try again."
        }
        ErrorKind::Authentication => "You are not authorized to do that.",
        ErrorKind::ArchivalService => {
            "Archiving is temporarily unavailable. Your data is safe and will be archived later."
        }
        ErrorKind::TransportService => "Your message could not be delivered. Please try again.",
        ErrorKind::Unknown => "Something went wrong. Please try again later.",
    }
}

fn by_code(kind: ErrorKind, code: &str) -> Option<&'static str> {
    let message = match (kind, code) {
        (_, Rejection::TIMEOUT_CODE) => {
            "We're still working through your earlier messages. Please try again in a moment."
        }
        (_, Rejection::CLEARED_CODE | Rejection::CLOSED_CODE) => {
            "The service is restarting. Please send your message again shortly."
        }
        (ErrorKind::CompletionService, "insufficient_quota") => {
            "The assistant has reached its usage limit. Please try again later."
        }
        (ErrorKind::CompletionService, "invalid_api_key") => {
            "The assistant is misconfigured. An administrator has been notified."
        }
        (ErrorKind::CompletionService, "rate_limited") => {
            "The assistant is handling too many requests. Please wait a moment and try again."
        }
        (ErrorKind::Storage, "23505") => "This record already exists.",
        (ErrorKind::Storage, "42P01") => {
            "The service is not fully set up yet. Please contact support."
        }
        _ => return None,
    };
    Some(message)
}

pub(crate) fn suggested_action(record: &ErrorRecord) -> &'static str {
    match record.code.as_deref() {
        Some(Rejection::TIMEOUT_CODE) => {
            "lane backlog exceeded the wait timeout; look for slow operations on this key"
        }
        Some(Rejection::CLEARED_CODE | Rejection::CLOSED_CODE) => {
            "queue was shut down; resubmit after restart"
        }
        Some("insufficient_quota") => "top up completion service quota",
        Some("invalid_api_key") => "rotate the completion service API key",
        Some("42P01") => "run pending database migrations",
        _ => match record.kind {
            ErrorKind::Storage => "check database connectivity and recent schema changes",
            ErrorKind::CompletionService => "check completion service status and rate limits",
            ErrorKind::Network => "check outbound connectivity and DNS",
            ErrorKind::Validation => "inspect the rejected input; retrying will not help",
            ErrorKind::Authentication => "verify credentials and permissions",
            ErrorKind::ArchivalService => "check archival service token and workspace access",
            ErrorKind::TransportService => "check messaging transport token and rate limits",
            ErrorKind::Unknown => "search logs for the request id",
        },
    }
}
