//! Error types for the `domain` layer.
use session::admission::VerifyError;
use session::{Error as SessionError, ErrorKind as SessionErrorKind};
use std::error::Error as StdError;
use std::fmt;

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer.
/// The `source` field holds the original error that caused the domain error,
/// so that layers above can translate errors without depending on the crates
/// that produced them.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    External(ExternalErrorKind),
}

/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Token(TokenErrorKind),
    Session(SessionErrorKind),
    Config,
    Other(String),
}

/// Why a token could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenErrorKind {
    Expired,
    Invalid,
    Malformed,
    /// Signature checked out but no usable user id was in the claims.
    MissingIdentity,
    Encoding,
}

/// Enum representing the various kinds of external errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Io,
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Domain Error: {:?}", self.error_kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl Error {
    pub fn config(message: &str) -> Self {
        Error {
            source: Some(message.into()),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
        }
    }

    pub fn token_error_kind(&self) -> Option<TokenErrorKind> {
        match self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Token(kind)) => Some(kind),
            _ => None,
        }
    }
}

impl From<TokenErrorKind> for Error {
    fn from(kind: TokenErrorKind) -> Self {
        Error {
            source: None,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Token(kind)),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let token_error_kind = match err.kind() {
            ErrorKind::ExpiredSignature => TokenErrorKind::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenErrorKind::Malformed,
            _ => TokenErrorKind::Invalid,
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Token(token_error_kind)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::Io),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
        }
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error {
            source: err.source,
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Session(err.error_kind)),
        }
    }
}

// The admission gate only needs to know what kind of refusal this was.
impl From<TokenErrorKind> for VerifyError {
    fn from(kind: TokenErrorKind) -> Self {
        match kind {
            TokenErrorKind::Expired => VerifyError::Expired,
            TokenErrorKind::Malformed => VerifyError::Malformed,
            TokenErrorKind::Invalid
            | TokenErrorKind::MissingIdentity
            | TokenErrorKind::Encoding => VerifyError::Invalid,
        }
    }
}
