//! Error types for the `session` crate.
//!
//! Follows the same pattern as `domain::error`: a root `Error` struct holding an
//! optional source and a tree of error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the real-time session core.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the session core.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Admission(AdmissionErrorKind),
    Invariant(InvariantErrorKind),
    Delivery(DeliveryErrorKind),
}

/// Reasons a handshake is refused. Always translated into a rejected upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionErrorKind {
    MissingCredential,
    InvalidCredential,
    VerifierTimeout,
}

/// Lifecycle bugs. These indicate a broken caller, never a client mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantErrorKind {
    /// `register` was called for a connection that is already registered.
    DuplicateConnection,
    /// A connection is listed under an identity but has no reverse entry.
    MissingReverseIndex,
}

/// Failures writing to a single connection during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The connection's writer has gone away.
    Closed,
    /// The connection's outbound queue is full.
    Full,
}

impl fmt::Display for AdmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            AdmissionErrorKind::MissingCredential => "missing credential",
            AdmissionErrorKind::InvalidCredential => "invalid credential",
            AdmissionErrorKind::VerifierTimeout => "credential verification timed out",
        };
        write!(f, "{reason}")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Admission(kind) => write!(f, "Admission error: {kind}"),
            ErrorKind::Invariant(kind) => write!(f, "Invariant violation: {kind:?}"),
            ErrorKind::Delivery(kind) => write!(f, "Delivery error: {kind:?}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<AdmissionErrorKind> for Error {
    fn from(kind: AdmissionErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Admission(kind),
        }
    }
}

impl From<InvariantErrorKind> for Error {
    fn from(kind: InvariantErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Invariant(kind),
        }
    }
}

impl From<DeliveryErrorKind> for Error {
    fn from(kind: DeliveryErrorKind) -> Self {
        Error {
            source: None,
            error_kind: ErrorKind::Delivery(kind),
        }
    }
}

impl Error {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Invariant(_))
    }
}
