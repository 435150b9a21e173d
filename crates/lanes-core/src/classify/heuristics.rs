//! Fallback classification for failures that arrive untyped.
//!
//! Collaborators should hand over a [`Failure`](crate::domain::Failure); everything here only
//! runs when the source chain carries no typed failure at all.

use std::error::Error;
use std::io;

use crate::domain::{ErrorKind, ExternalFailure};

/// Facts pulled out of an error's source chain.
#[derive(Debug, Default)]
pub(crate) struct Evidence {
    /// Every message in the chain, lowercased and joined.
    pub text: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub io_kind: Option<io::ErrorKind>,
    pub elapsed: bool,
    pub malformed_json: bool,
}

impl Evidence {
    pub(crate) fn gather(err: &(dyn Error + 'static)) -> Self {
        let mut evidence = Self::default();
        let mut messages = Vec::new();
        let mut current = Some(err);

        while let Some(e) = current {
            messages.push(e.to_string().to_lowercase());

            if let Some(external) = e.downcast_ref::<ExternalFailure>() {
                evidence.status = evidence.status.or(external.status);
                if evidence.code.is_none() {
                    evidence.code = external.code.clone();
                }
            } else if let Some(io) = e.downcast_ref::<io::Error>() {
                if evidence.io_kind.is_none() {
                    evidence.io_kind = Some(io.kind());
                }
            } else if e.is::<tokio::time::error::Elapsed>() {
                evidence.elapsed = true;
            } else if e.is::<serde_json::Error>() {
                evidence.malformed_json = true;
            }
            current = e.source();
        }

        evidence.text = messages.join(": ");
        evidence
    }

    fn mentions(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.text.contains(needle))
    }
}

const AUTH_WORDS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "incorrect api key",
    "permission denied",
    "authentication",
];
const STORAGE_WORDS: &[&str] = &[
    "database",
    "postgres",
    "supabase",
    "sql",
    "constraint",
    "deadlock",
    "relation",
];
const COMPLETION_WORDS: &[&str] = &["openai", "deepseek", "completion", "llm", "quota", "model"];
const ARCHIVAL_WORDS: &[&str] = &["notion", "archiv"];
const TRANSPORT_WORDS: &[&str] = &["telegram", "bot api", "chat not found"];
const NETWORK_WORDS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "fetch failed",
    "dns",
    "socket",
    "econn",
    "etimedout",
];
const VALIDATION_WORDS: &[&str] = &["invalid", "validation", "malformed", "parse", "required"];

/// Pick a kind and a code. The first rule that matches wins.
pub(crate) fn infer(evidence: &Evidence) -> (ErrorKind, Option<String>) {
    let code = evidence
        .code
        .clone()
        .or_else(|| code_from_text(evidence))
        .or_else(|| code_from_io(evidence.io_kind))
        .or_else(|| evidence.elapsed.then(|| "ETIMEDOUT".to_owned()))
        .or_else(|| evidence.status.and_then(code_from_status));

    let kind = kind_from_text(evidence)
        .or_else(|| code.as_deref().and_then(kind_from_code))
        .or_else(|| evidence.io_kind.and_then(kind_from_io))
        .or_else(|| evidence.elapsed.then_some(ErrorKind::Network))
        .or_else(|| evidence.malformed_json.then_some(ErrorKind::Validation))
        .or_else(|| evidence.status.and_then(kind_from_status))
        .unwrap_or(ErrorKind::Unknown);

    // 401 from the completion service means our key is bad, not the actor's
    let code = match (kind, evidence.status, code) {
        (ErrorKind::CompletionService, Some(401), None) => Some("invalid_api_key".to_owned()),
        (_, _, code) => code,
    };

    (kind, code)
}

fn kind_from_text(evidence: &Evidence) -> Option<ErrorKind> {
    // order matters: "invalid api key" is auth, "database timeout" is storage
    [
        (AUTH_WORDS, ErrorKind::Authentication),
        (STORAGE_WORDS, ErrorKind::Storage),
        (COMPLETION_WORDS, ErrorKind::CompletionService),
        (ARCHIVAL_WORDS, ErrorKind::ArchivalService),
        (TRANSPORT_WORDS, ErrorKind::TransportService),
        (NETWORK_WORDS, ErrorKind::Network),
        (VALIDATION_WORDS, ErrorKind::Validation),
    ]
    .into_iter()
    .find(|(words, _)| evidence.mentions(words))
    .map(|(_, kind)| kind)
}

fn code_from_text(evidence: &Evidence) -> Option<String> {
    let code = if evidence.mentions(&["rate limit", "too many requests"]) {
        "rate_limited"
    } else if evidence.mentions(&["insufficient_quota", "exceeded your current quota"]) {
        "insufficient_quota"
    } else if evidence.mentions(&["invalid api key", "incorrect api key", "invalid_api_key"]) {
        "invalid_api_key"
    } else if evidence.mentions(&["duplicate key", "unique constraint"]) {
        "23505"
    } else if evidence.mentions(&["relation"]) && evidence.mentions(&["does not exist"]) {
        "42P01"
    } else if evidence.mentions(&["service unavailable", "temporarily unavailable"]) {
        "service_unavailable"
    } else if evidence.mentions(&["econnrefused", "connection refused"]) {
        "ECONNREFUSED"
    } else if evidence.mentions(&["econnreset", "connection reset"]) {
        "ECONNRESET"
    } else if evidence.mentions(&["etimedout", "timed out", "timeout"]) {
        "ETIMEDOUT"
    } else {
        return None;
    };
    Some(code.to_owned())
}

fn code_from_io(kind: Option<io::ErrorKind>) -> Option<String> {
    let code = match kind? {
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        _ => return None,
    };
    Some(code.to_owned())
}

fn code_from_status(status: u16) -> Option<String> {
    let code = match status {
        429 => "rate_limited",
        503 => "service_unavailable",
        408 | 504 => "timeout",
        _ => return None,
    };
    Some(code.to_owned())
}

fn kind_from_code(code: &str) -> Option<ErrorKind> {
    match code {
        "ETIMEDOUT" | "ECONNRESET" | "ECONNREFUSED" | "EAI_AGAIN" | "timeout" => {
            Some(ErrorKind::Network)
        }
        "invalid_api_key" | "insufficient_quota" => Some(ErrorKind::CompletionService),
        // five-character SQLSTATE
        c if is_sqlstate(c) => Some(ErrorKind::Storage),
        _ => None,
    }
}

fn is_sqlstate(code: &str) -> bool {
    code.len() == 5
        && code.starts_with(|c: char| c.is_ascii_digit())
        && code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

fn kind_from_io(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::AddrNotAvailable => Some(ErrorKind::Network),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Some(ErrorKind::Validation),
        io::ErrorKind::PermissionDenied => Some(ErrorKind::Authentication),
        _ => None,
    }
}

fn kind_from_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Authentication),
        400 | 422 => Some(ErrorKind::Validation),
        408 | 504 => Some(ErrorKind::Network),
        _ => None,
    }
}
