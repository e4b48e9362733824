//! Connection admission: decides whether an inbound WebSocket handshake may
//! be upgraded, before the upgrade response is ever written.

use crate::connection::Identity;
use crate::error::{AdmissionErrorKind, Error};
use crate::lifecycle::ConnectionState;
use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, request::Parts};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TOKEN_QUERY_PARAM: &str = "token";
pub const DEFAULT_AUTH_HEADER_SCHEME: &str = "Bearer";
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a verifier refused a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    Expired,
    Invalid,
    Malformed,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifyError::Expired => write!(f, "token expired"),
            VerifyError::Invalid => write!(f, "token invalid"),
            VerifyError::Malformed => write!(f, "token malformed"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Validates a bearer credential and extracts the identity it names.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

/// What the rest of the system knows about a user, used to enrich logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub user_id: Identity,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Looks up the full user record for an identity. Admission never depends on
/// the answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, identity: Identity) -> Option<UserRecord>;
}

/// Where to look for the credential, and how long verification may take.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub query_param: String,
    pub header_scheme: String,
    pub verify_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            query_param: DEFAULT_TOKEN_QUERY_PARAM.to_string(),
            header_scheme: DEFAULT_AUTH_HEADER_SCHEME.to_string(),
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

/// The parts of a handshake request admission cares about.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub query: Option<String>,
    pub authorization: Option<String>,
}

impl HandshakeRequest {
    pub fn new(query: Option<&str>, authorization: Option<&str>) -> Self {
        Self {
            query: query.map(str::to_owned),
            authorization: authorization.map(str::to_owned),
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            query: parts.uri.query().map(str::to_owned),
            authorization: parts
                .headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        }
    }
}

/// A handshake that passed admission. Carried into the lifecycle coordinator
/// once the transport reports the connection as established.
#[derive(Debug)]
pub struct Admitted {
    pub identity: Identity,
    pub credential: SecretString,
    pub user: Option<UserRecord>,
}

impl Admitted {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::Admitted
    }
}

#[derive(Debug)]
pub enum Admission {
    Accept(Admitted),
    Reject(AdmissionErrorKind),
}

impl Admission {
    pub fn into_result(self) -> Result<Admitted, Error> {
        match self {
            Admission::Accept(admitted) => Ok(admitted),
            Admission::Reject(kind) => Err(kind.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accept(_))
    }

    /// A refused handshake never leaves `Pending`.
    pub fn state(&self) -> ConnectionState {
        match self {
            Admission::Accept(admitted) => admitted.state(),
            Admission::Reject(_) => ConnectionState::Pending,
        }
    }
}

pub struct Gate {
    verifier: Arc<dyn TokenVerifier>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    config: AdmissionConfig,
}

impl Gate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, config: AdmissionConfig) -> Self {
        Self {
            verifier,
            resolver: None,
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Decide whether the handshake may proceed. Never returns verifier
    /// details to the caller; those only reach the log.
    pub async fn admit(&self, request: &HandshakeRequest) -> Admission {
        let Some(credential) = self.extract_credential(request) else {
            warn!("WebSocket handshake rejected: no credential provided");
            return Admission::Reject(AdmissionErrorKind::MissingCredential);
        };

        let verification = tokio::time::timeout(
            self.config.verify_timeout,
            self.verifier.verify(credential.expose_secret()),
        )
        .await;

        let identity = match verification {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!("WebSocket handshake rejected: {e}");
                return Admission::Reject(AdmissionErrorKind::InvalidCredential);
            }
            Err(_) => {
                warn!(
                    "WebSocket handshake rejected: verification exceeded {:?}",
                    self.config.verify_timeout
                );
                return Admission::Reject(AdmissionErrorKind::VerifierTimeout);
            }
        };

        let user = self.resolve(identity).await;
        match &user {
            Some(record) => info!(
                "WebSocket handshake accepted for user {} ({})",
                identity,
                record.email.as_deref().unwrap_or("no email")
            ),
            None => info!("WebSocket handshake accepted for user {identity}"),
        }

        Admission::Accept(Admitted {
            identity,
            credential,
            user,
        })
    }

    async fn resolve(&self, identity: Identity) -> Option<UserRecord> {
        let resolver = self.resolver.as_ref()?;
        match tokio::time::timeout(self.config.verify_timeout, resolver.resolve(identity)).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                debug!("No user record found for user {identity}, admitting with identity only");
                None
            }
            Err(_) => {
                warn!("User lookup for {identity} timed out, admitting with identity only");
                None
            }
        }
    }

    /// Query parameter first, then the `Authorization` header.
    pub fn extract_credential(&self, request: &HandshakeRequest) -> Option<SecretString> {
        request
            .query
            .as_deref()
            .and_then(|query| self.token_from_query(query))
            .or_else(|| {
                request
                    .authorization
                    .as_deref()
                    .and_then(|header| self.token_from_header(header))
            })
            .map(SecretString::from)
    }

    fn token_from_query(&self, query: &str) -> Option<String> {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == self.config.query_param)
            .map(|(_, value)| match urlencoding::decode(value) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => value.to_string(),
            })
            .filter(|token| !token.trim().is_empty())
    }

    fn token_from_header(&self, header: &str) -> Option<String> {
        let (scheme, token) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case(&self.config.header_scheme) {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}
