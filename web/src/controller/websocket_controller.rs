use crate::controller::ApiResponse;
use crate::{AppState, Error};
use axum::extract::{Path, State};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use session::Identity;

use log::*;

#[derive(Debug, Serialize)]
pub struct UserSessionStatus {
    pub user_id: Identity,
    pub session_count: usize,
    pub has_active_sessions: bool,
}

/// GET overall connection statistics
pub async fn status(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let status = app_state.session_manager.status();

    debug!(
        "WebSocket status: {} session(s) across {} user(s)",
        status.total_active_sessions, status.user_count
    );

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), status)))
}

/// GET connection statistics for one user
pub async fn user_status(
    State(app_state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, Error> {
    let user_id = Identity::new(user_id);
    let session_count = app_state.session_manager.active_count(&user_id);

    let user_status = UserSessionStatus {
        user_id,
        session_count,
        has_active_sessions: session_count > 0,
    };

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), user_status)))
}

/// GET every user with at least one open connection
pub async fn users(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let users = app_state.session_manager.active_identities();

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), users)))
}
