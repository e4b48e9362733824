use crate::connection::Identity;
use crate::message::{Event as SessionEvent, Message as SessionMessage, MessageScope};
use crate::Manager;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Handles domain events by converting them to WebSocket messages and fanning
/// them out to the affected connections.
///
/// The publisher decides who should be notified; this handler only routes.
pub struct SessionDomainEventHandler {
    session_manager: Arc<Manager>,
}

impl SessionDomainEventHandler {
    pub fn new(session_manager: Arc<Manager>) -> Self {
        Self { session_manager }
    }

    /// Send a message to every live connection of each listed user.
    fn send_to_users(&self, event: SessionEvent, user_ids: &[events::Id]) {
        let mut delivered = 0;
        for user_id in user_ids {
            delivered += self
                .session_manager
                .send_message(SessionMessage {
                    event: event.clone(),
                    scope: MessageScope::User {
                        identity: Identity::from(*user_id),
                    },
                })
                .delivered;
        }

        debug!(
            "Sent event to {} user(s) {:?} over {} connection(s)",
            user_ids.len(),
            user_ids,
            delivered
        );
    }
}

#[async_trait]
impl EventHandler for SessionDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::UserNotification {
                payload,
                notify_user_ids,
            } => {
                self.send_to_users(
                    SessionEvent::Notification {
                        payload: payload.clone(),
                    },
                    notify_user_ids,
                );
            }

            DomainEvent::TopicMessage { topic, payload } => {
                let delivery = self.session_manager.send_message(SessionMessage {
                    event: SessionEvent::TopicMessage {
                        topic: topic.clone(),
                        payload: payload.clone(),
                    },
                    scope: MessageScope::Topic {
                        topic: topic.clone(),
                    },
                });
                debug!(
                    "Sent topic message on {} to {} subscriber(s)",
                    topic, delivery.delivered
                );
            }

            DomainEvent::ForceLogout { user_id, reason } => {
                info!("Forcing logout of user {user_id}: {reason}");
                self.send_to_users(
                    SessionEvent::ForceLogout {
                        reason: reason.clone(),
                    },
                    std::slice::from_ref(user_id),
                );
                // The notice is queued ahead of the close frame.
                self.session_manager
                    .evict_identity(&Identity::from(*user_id));
            }

            // Client input is for other handlers; nothing to fan out.
            DomainEvent::ClientData { .. } => {}
        }
    }
}
