use crate::admission::Admitted;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, Identity};
use crate::error::{DeliveryErrorKind, Error};
use crate::lifecycle::{Coordinator, Registration};
use crate::message::{EventType, Message as SessionMessage, MessageScope};
use crate::subscription::{normalize_topic, Subscriptions};
use axum::extract::ws::{close_code, CloseFrame, Message as Frame};
use log::*;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub delivered: usize,
    /// Queue was full; this message was skipped for that connection only.
    pub dropped: usize,
    /// Writer was gone; the connection was evicted.
    pub closed: usize,
}

impl Delivery {
    pub fn targets(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Point-in-time view used by the management endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub total_active_sessions: usize,
    pub active_users: Vec<Identity>,
    pub user_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
    InvalidTopic,
    NotRegistered,
}

/// Owns the registry and routes messages to live connections.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<Subscriptions>,
    coordinator: Coordinator,
}

impl Manager {
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(Subscriptions::new());
        let coordinator = Coordinator::new(registry.clone(), subscriptions.clone());
        Self {
            registry,
            subscriptions,
            coordinator,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register an admitted connection that the transport has just established.
    pub fn open_connection(
        &self,
        handle: ConnectionHandle,
        admitted: Admitted,
    ) -> Result<Registration, Error> {
        self.coordinator.on_open(handle, admitted)
    }

    pub fn subscribe(&self, connection_id: &ConnectionId, topic: &str) -> SubscribeOutcome {
        let Some(topic) = normalize_topic(topic) else {
            return SubscribeOutcome::InvalidTopic;
        };
        if self.registry.identity_of(connection_id).is_none() {
            warn!("Ignoring subscription to {topic} from unregistered connection {connection_id}");
            return SubscribeOutcome::NotRegistered;
        }

        if self.subscriptions.subscribe(connection_id, &topic) {
            debug!("Connection {connection_id} subscribed to {topic}");
            SubscribeOutcome::Subscribed
        } else {
            SubscribeOutcome::AlreadySubscribed
        }
    }

    pub fn unsubscribe(&self, connection_id: &ConnectionId, topic: &str) -> bool {
        match normalize_topic(topic) {
            Some(topic) => self.subscriptions.unsubscribe(connection_id, &topic),
            None => false,
        }
    }

    pub fn topics_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        self.subscriptions.topics_of(connection_id)
    }

    /// Send a message based on its scope. Targets are snapshotted first, so
    /// no lock is held while frames are queued.
    pub fn send_message(&self, message: SessionMessage) -> Delivery {
        let event_type = message.event.event_type();

        let frame = match message.event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {event_type} event: {e}");
                return Delivery::default();
            }
        };

        let targets = match &message.scope {
            MessageScope::User { identity } => self.registry.sessions_of(identity),
            MessageScope::Topic { topic } => self
                .subscriptions
                .subscribers(topic)
                .iter()
                .filter_map(|id| self.registry.handle_of(id))
                .collect(),
            MessageScope::Broadcast => self.registry.all_connections(),
        };

        let delivery = self.fan_out(&targets, frame);
        trace!(
            "Sent {event_type} to {:?}: {}/{} delivered",
            message.scope,
            delivery.delivered,
            delivery.targets()
        );
        delivery
    }

    fn fan_out(&self, targets: &[ConnectionHandle], frame: Frame) -> Delivery {
        let mut delivery = Delivery::default();

        for handle in targets {
            match handle.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(DeliveryErrorKind::Full) => {
                    warn!(
                        "Outbound queue full for connection {}, dropping message",
                        handle.id()
                    );
                    delivery.dropped += 1;
                }
                Err(DeliveryErrorKind::Closed) => {
                    warn!(
                        "Failed to send event to connection {}: writer closed. Evicting connection.",
                        handle.id()
                    );
                    self.evict(handle.id());
                    delivery.closed += 1;
                }
            }
        }

        delivery
    }

    /// Forcibly drop every connection of `identity`. Each one is told to
    /// close, loses its subscriptions and leaves the registry; its handler's
    /// `Registration` then finds it already evicted. Returns how many were
    /// evicted.
    pub fn evict_identity(&self, identity: &Identity) -> usize {
        let handles = self.registry.sessions_of(identity);

        for handle in &handles {
            let close = Frame::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "session revoked".into(),
            }));
            if let Err(e) = handle.try_send(close) {
                debug!("Could not queue close for connection {}: {e:?}", handle.id());
            }
            self.evict(handle.id());
        }

        if !handles.is_empty() {
            info!("Evicted {} connection(s) of user {identity}", handles.len());
        }
        handles.len()
    }

    fn evict(&self, connection_id: &ConnectionId) {
        self.subscriptions.remove_connection(connection_id);
        self.registry.deregister(connection_id);
    }

    pub fn total_active_count(&self) -> usize {
        self.registry.total_active_count()
    }

    /// Active identities, sorted for stable output.
    pub fn active_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> =
            self.registry.all_active_identities().into_iter().collect();
        identities.sort();
        identities
    }

    pub fn active_count(&self, identity: &Identity) -> usize {
        self.registry.active_count(identity)
    }

    pub fn has_active(&self, identity: &Identity) -> bool {
        self.registry.has_active(identity)
    }

    pub fn status(&self) -> Status {
        let active_users = self.active_identities();
        Status {
            total_active_sessions: self.total_active_count(),
            user_count: active_users.len(),
            active_users,
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Event;
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::sync::mpsc::{self, Receiver};

    fn open(
        manager: &Manager,
        identity: i64,
        capacity: usize,
    ) -> (Registration, Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let registration = manager
            .open_connection(
                ConnectionHandle::new(ConnectionId::new(), tx),
                Admitted {
                    identity: Identity::new(identity),
                    credential: SecretString::from("token".to_string()),
                    user: None,
                },
            )
            .unwrap();
        (registration, rx)
    }

    fn notification(identity: i64) -> SessionMessage {
        SessionMessage {
            event: Event::Notification {
                payload: json!({"n": 1}),
            },
            scope: MessageScope::User {
                identity: Identity::new(identity),
            },
        }
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_connection_of_that_user() {
        let manager = Manager::new();
        let (_r1, mut rx1) = open(&manager, 1, 4);
        let (_r2, mut rx2) = open(&manager, 1, 4);
        let (_r3, mut rx3) = open(&manager, 2, 4);

        let delivery = manager.send_message(notification(1));
        assert_eq!(delivery.delivered, 2);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_user_without_connections_delivers_to_nobody() {
        let manager = Manager::new();
        assert_eq!(manager.send_message(notification(99)), Delivery::default());
    }

    #[tokio::test]
    async fn test_closed_connection_is_evicted_and_others_still_receive() {
        let manager = Manager::new();
        let (_r1, rx1) = open(&manager, 1, 4);
        let (_r2, mut rx2) = open(&manager, 1, 4);
        drop(rx1);

        let delivery = manager.send_message(notification(1));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.closed, 1);
        assert!(rx2.try_recv().is_ok());
        assert_eq!(manager.active_count(&Identity::new(1)), 1);
        manager.registry().check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_for_that_connection() {
        let manager = Manager::new();
        let (_slow, _slow_rx) = open(&manager, 1, 1);
        let (_fast, mut fast_rx) = open(&manager, 2, 8);

        let broadcast = || SessionMessage {
            event: Event::ForceLogout {
                reason: "maintenance".to_string(),
            },
            scope: MessageScope::Broadcast,
        };

        assert_eq!(manager.send_message(broadcast()).delivered, 2);
        let second = manager.send_message(broadcast());
        assert_eq!(second.delivered, 1);
        assert_eq!(second.dropped, 1);

        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
        assert_eq!(manager.total_active_count(), 2);
    }

    #[tokio::test]
    async fn test_topic_fan_out_only_reaches_subscribers() {
        let manager = Manager::new();
        let (r1, mut rx1) = open(&manager, 1, 4);
        let (_r2, mut rx2) = open(&manager, 2, 4);

        assert_eq!(
            manager.subscribe(r1.connection_id(), " test-topic "),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            manager.subscribe(r1.connection_id(), "test-topic"),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(
            manager.subscribe(r1.connection_id(), ""),
            SubscribeOutcome::InvalidTopic
        );

        let delivery = manager.send_message(SessionMessage {
            event: Event::TopicMessage {
                topic: "test-topic".to_string(),
                payload: json!({"message": "Hello world"}),
            },
            scope: MessageScope::Topic {
                topic: "test-topic".to_string(),
            },
        });
        assert_eq!(delivery.delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        assert!(manager.unsubscribe(r1.connection_id(), "test-topic"));
        assert!(manager.topics_of(r1.connection_id()).is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_connection_cannot_subscribe() {
        let manager = Manager::new();
        assert_eq!(
            manager.subscribe(&ConnectionId::new(), "news"),
            SubscribeOutcome::NotRegistered
        );
    }

    #[tokio::test]
    async fn test_status_matches_registry() {
        let manager = Manager::new();
        let (_a, _rxa) = open(&manager, 3, 1);
        let (_b, _rxb) = open(&manager, 1, 1);
        let (c, _rxc) = open(&manager, 1, 1);

        let status = manager.status();
        assert_eq!(status.total_active_sessions, 3);
        assert_eq!(status.active_users, vec![Identity::new(1), Identity::new(3)]);
        assert_eq!(status.user_count, 2);

        c.close();
        assert_eq!(manager.active_count(&Identity::new(1)), 1);
        assert!(manager.has_active(&Identity::new(3)));
    }

    #[tokio::test]
    async fn test_evict_identity_closes_and_deregisters_every_connection() {
        let manager = Manager::new();
        let (r1, mut rx1) = open(&manager, 5, 4);
        let (_r2, mut rx2) = open(&manager, 5, 4);
        let (_other, mut other_rx) = open(&manager, 6, 4);
        manager.subscribe(r1.connection_id(), "news");

        assert_eq!(manager.evict_identity(&Identity::new(5)), 2);

        assert!(!manager.has_active(&Identity::new(5)));
        assert_eq!(manager.active_count(&Identity::new(5)), 0);
        assert!(manager.topics_of(r1.connection_id()).is_empty());
        assert!(matches!(rx1.try_recv(), Ok(Frame::Close(_))));
        assert!(matches!(rx2.try_recv(), Ok(Frame::Close(_))));

        // Later user-scoped traffic reaches nobody; other users are untouched.
        assert_eq!(manager.send_message(notification(5)).targets(), 0);
        assert!(rx1.try_recv().is_err());
        assert!(other_rx.try_recv().is_err());
        assert!(manager.has_active(&Identity::new(6)));
        manager.registry().check_invariants().unwrap();

        // The guard's own close is a no-op now.
        assert_eq!(r1.close(), None);
        assert_eq!(manager.evict_identity(&Identity::new(5)), 0);
    }
}
