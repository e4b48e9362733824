use config::Config;
use events::EventPublisher;
use log::info;
use session::admission::Gate;
use session::{Manager, SessionDomainEventHandler};
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state shared by every request handler.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub gate: Arc<Gate>,
    pub session_manager: Arc<Manager>,
    pub event_publisher: EventPublisher,
}

impl AppState {
    /// Builds the session manager and wires it to the event publisher so that
    /// published domain events reach connected clients.
    pub fn new(app_config: Config, gate: Gate) -> Self {
        let session_manager = Arc::new(Manager::new());
        let event_publisher = EventPublisher::new().with_handler(Arc::new(
            SessionDomainEventHandler::new(Arc::clone(&session_manager)),
        ));

        info!(
            "Session state ready (token query param: {}, header scheme: {}, outbound buffer: {})",
            gate.config().query_param,
            gate.config().header_scheme,
            app_config.outbound_buffer()
        );

        Self {
            config: app_config,
            gate: Arc::new(gate),
            session_manager,
            event_publisher,
        }
    }

    /// Adds another domain event handler after the session handler.
    pub fn with_event_handler(mut self, handler: Arc<dyn events::EventHandler>) -> Self {
        self.event_publisher = self.event_publisher.with_handler(handler);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clap::Parser;
    use events::{DomainEvent, EventHandler};
    use session::admission::{TokenVerifier, VerifyError};
    use session::Identity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoTokens;

    #[async_trait]
    impl TokenVerifier for NoTokens {
        async fn verify(&self, _token: &str) -> Result<Identity, VerifyError> {
            Err(VerifyError::Invalid)
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &DomainEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn app_state() -> AppState {
        let config = Config::parse_from(["plumeo_rs"]);
        let gate = Gate::new(Arc::new(NoTokens), config.admission());
        AppState::new(config, gate)
    }

    #[test]
    fn test_new_wires_session_handler() {
        let state = app_state();
        assert_eq!(state.event_publisher.handler_count(), 1);
        assert_eq!(state.session_manager.total_active_count(), 0);
    }

    #[tokio::test]
    async fn test_extra_handlers_run_after_session_handler() {
        let counter = Arc::new(Counter::default());
        let state = app_state().with_event_handler(counter.clone());
        assert_eq!(state.event_publisher.handler_count(), 2);

        state
            .event_publisher
            .publish(DomainEvent::ForceLogout {
                user_id: 9,
                reason: "test".to_string(),
            })
            .await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
