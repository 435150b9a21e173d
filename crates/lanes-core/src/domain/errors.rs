//! Failure taxonomy shared by collaborators and the classifier.
//!
//! Collaborators should fail with a typed [`Failure`] at their own boundary. Errors that
//! cannot be typed at the source (third-party clients, opaque transports) can be wrapped in
//! [`ExternalFailure`] so the status/code they carry is still visible to classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of failure kinds. Anything unrecognised is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Data store (records, profiles, history).
    Storage,
    /// Completion / reply generation service.
    CompletionService,
    Network,
    /// Bad input from the actor or a caller.
    Validation,
    Authentication,
    /// Document archival service.
    ArchivalService,
    /// Messaging transport back to the actor.
    TransportService,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Storage,
        ErrorKind::CompletionService,
        ErrorKind::Network,
        ErrorKind::Validation,
        ErrorKind::Authentication,
        ErrorKind::ArchivalService,
        ErrorKind::TransportService,
        ErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Storage => "STORAGE",
            ErrorKind::CompletionService => "COMPLETION_SERVICE",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::ArchivalService => "ARCHIVAL_SERVICE",
            ErrorKind::TransportService => "TRANSPORT_SERVICE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Storage | ErrorKind::Authentication => Severity::High,
            ErrorKind::Validation | ErrorKind::ArchivalService => Severity::Low,
            ErrorKind::CompletionService
            | ErrorKind::Network
            | ErrorKind::TransportService
            | ErrorKind::Unknown => Severity::Medium,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory severity. Ordered, so `severity >= Severity::High` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Recoverable, core features unaffected.
    Low,
    /// Some features degraded.
    Medium,
    /// Core features affected.
    High,
    /// System unusable.
    Critical,
}

impl Severity {
    /// High and Critical trigger the severe-error hook.
    pub fn is_severe(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A failure deliberately typed by the collaborator that produced it.
///
/// The classifier uses these fields verbatim; unset `severity`/`retryable` fall back to the
/// per-kind defaults and code overrides.
#[derive(Debug, Error)]
#[error("{kind} failure: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    pub severity: Option<Severity>,
    pub code: Option<String>,
    pub status: Option<u16>,
    pub retryable: Option<bool>,
    #[source]
    pub source: Option<BoxError>,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: None,
            code: None,
            status: None,
            retryable: None,
            source: None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn completion_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CompletionService, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn archival_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArchivalService, message)
    }

    pub fn transport_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportService, message)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Overrides the kind/code retry rules for this one failure.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// An opaque failure from outside the system, carrying whatever status/code it exposed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExternalFailure {
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    #[source]
    pub source: Option<BoxError>,
}

impl ExternalFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}
