use crate::Error;
use axum::{extract::FromRequestParts, http::request::Parts};
use log::*;
use service::AppState;
use session::admission::{Admitted, HandshakeRequest};

/// A handshake the admission gate accepted.
///
/// Must be listed before `WebSocketUpgrade` in a handler's arguments so that
/// a refused handshake is answered with 401 and never upgraded.
pub(crate) struct AdmittedConnection(pub Admitted);

impl FromRequestParts<AppState> for AdmittedConnection {
    type Rejection = Error;

    // The gate logs why a handshake was refused; the rejection itself only
    // carries the admission error kind, which maps to 401.
    async fn from_request_parts(
        parts: &mut Parts,
        app_state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request = HandshakeRequest::from_parts(parts);

        let admission = app_state.gate.admit(&request).await;
        trace!("Handshake for {} is {:?}", parts.uri.path(), admission.state());

        let admitted = admission.into_result()?;
        Ok(AdmittedConnection(admitted))
    }
}
