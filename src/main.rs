use domain::error::Error as DomainError;
use domain::jwt::JwtVerifier;
use domain::user::Directory;
use log::*;
use service::{config::Config, logging::Logger, AppState};
use session::admission::Gate;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!("Starting up in {} mode", config.runtime_env());

    let app_state = match build_app_state(config) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to initialize: {e} ({:?})", e.error_kind);
            std::process::exit(1);
        }
    };

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

fn build_app_state(config: Config) -> Result<AppState, DomainError> {
    let jwt_secret = config
        .jwt_secret()
        .ok_or_else(|| DomainError::config("JWT_SECRET must be set to verify access tokens"))?;
    let verifier = JwtVerifier::new(jwt_secret, config.jwt_issuer());

    let mut gate = Gate::new(Arc::new(verifier), config.admission());
    match config.users_file() {
        Some(path) => {
            let directory = Directory::load(path)?;
            gate = gate.with_resolver(Arc::new(directory));
        }
        None => debug!("No users file configured, connections are logged by user id only"),
    }

    Ok(AppState::new(config, gate))
}
