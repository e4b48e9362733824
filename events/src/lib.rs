//! Event system infrastructure for the Plumeo backend.
//!
//! This crate is the publish/subscribe entry point that the real-time layer
//! hangs off of. Business code publishes a [`DomainEvent`]; registered
//! handlers (for example the WebSocket session manager) decide how to fan it
//! out to live connections.
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all events that may reach connected clients
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Payloads are carried as opaque JSON values.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A type alias for a user's numeric identifier as it appears in issued tokens.
pub type Id = i64;

/// Events that may need to be pushed to connected clients.
///
/// Events carry the user IDs to notify; the publisher is responsible for
/// deciding who should receive what. Payloads are never inspected by the
/// real-time layer.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Deliver an opaque payload to every live connection of the listed users.
    UserNotification {
        payload: Value,
        /// Users with zero connections are skipped silently.
        notify_user_ids: Vec<Id>,
    },
    /// Deliver an opaque payload to every connection subscribed to `topic`.
    TopicMessage { topic: String, payload: Value },
    /// Tell every connection of a user that it should drop its session.
    ForceLogout { user_id: Id, reason: String },
    /// A connected client sent a data message. Published so that downstream
    /// handlers can react to client input without knowing about sockets.
    ClientData {
        user_id: Id,
        kind: Option<String>,
        data: Value,
    },
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers, in registration order.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
