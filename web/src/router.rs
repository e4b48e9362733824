use crate::{controller::health_check_controller, ws, AppState};
use axum::{routing::get, Router};

use crate::controller::websocket_controller;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(websocket_routes(app_state.clone()))
        .merge(websocket_management_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

/// The upgrade endpoint. Admission happens inside the handler's extractors.
fn websocket_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler::ws_handler))
        .with_state(app_state)
}

/// Read-only views of the session registry
fn websocket_management_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/api/websocket/status", get(websocket_controller::status))
        .route(
            "/api/websocket/user/{id}/status",
            get(websocket_controller::user_status),
        )
        .route("/api/websocket/users", get(websocket_controller::users))
        .with_state(app_state)
}
