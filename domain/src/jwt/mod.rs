//! This module provides functionality for handling JSON Web Tokens (JWTs) within the domain layer.
//!
//! The primary use case is verifying the access token a client presents when
//! opening a WebSocket connection: `JwtVerifier` implements the session
//! crate's `TokenVerifier` so the admission gate never sees `jsonwebtoken`
//! directly. `generate_access_token` mints tokens the verifier accepts, for
//! development tooling and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain::jwt::{generate_access_token, JwtVerifier};
//!
//! let verifier = JwtVerifier::new("secret", None);
//! let token = generate_access_token("secret", 42, None, chrono::Duration::hours(1), None)?;
//! let claims = verifier.decode_claims(&token)?;
//! ```

use crate::error::{Error, TokenErrorKind};
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::*;
use session::admission::{TokenVerifier, VerifyError};
use session::Identity;

pub use claims::AccessClaims;

pub(crate) mod claims;

/// Verifies HS256-signed access tokens.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check signature, expiry and issuer, and return the claims.
    pub fn decode_claims(&self, token: &str) -> Result<AccessClaims, Error> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Decode and pull the user id out of the claims.
    pub fn identity_of(&self, token: &str) -> Result<Identity, Error> {
        let claims = self.decode_claims(token)?;
        claims
            .identity()
            .map(Identity::new)
            .ok_or_else(|| TokenErrorKind::MissingIdentity.into())
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        self.identity_of(token).map_err(|e| {
            let kind = e.token_error_kind().unwrap_or(TokenErrorKind::Invalid);
            debug!("Token verification failed: {:?}", kind);
            VerifyError::from(kind)
        })
    }
}

/// Mint an access token for `user_id` that `JwtVerifier::new(secret, issuer)`
/// accepts until `ttl` has elapsed.
pub fn generate_access_token(
    secret: &str,
    user_id: i64,
    email: Option<&str>,
    ttl: chrono::Duration,
    issuer: Option<&str>,
) -> Result<String, Error> {
    let now = chrono::Utc::now();
    let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
        warn!("Token lifetime {ttl} for user {user_id} is out of range");
        Error::from(TokenErrorKind::Encoding)
    })?;
    let claims = AccessClaims {
        sub: user_id.to_string(),
        user_id: Some(user_id),
        email: email.map(str::to_owned),
        iss: issuer.map(str::to_owned),
        exp: expires_at.timestamp().max(0) as usize,
        iat: now.timestamp().max(0) as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        warn!("Failed to encode access token for user {user_id}: {e}");
        Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::DomainErrorKind::Internal(
                crate::error::InternalErrorKind::Token(TokenErrorKind::Encoding),
            ),
        }
    })
}
