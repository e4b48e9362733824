//! Connection lifecycle: turns the transport's "established" and "closed"
//! notifications into exactly one `register` and exactly one `deregister`.

use crate::admission::Admitted;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, Identity, SessionEntry};
use crate::error::Error;
use crate::subscription::Subscriptions;
use log::*;
use std::sync::Arc;

/// Where a connection is in its life. `Pending` and `Admitted` are reported
/// by `Admission::state` before the coordinator sees the connection; a
/// rejected handshake stops at `Pending` and is never upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Admitted,
    Registered,
    Closed,
}

#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<Subscriptions>,
}

impl Coordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            registry,
            subscriptions,
        }
    }

    /// Called once the transport reports the connection as established.
    ///
    /// The returned guard deregisters the connection when it is closed or
    /// dropped, whichever comes first.
    pub fn on_open(
        &self,
        handle: ConnectionHandle,
        admitted: Admitted,
    ) -> Result<Registration, Error> {
        let connection_id = handle.id().clone();
        let identity = admitted.identity;

        self.registry
            .register(SessionEntry::new(identity, handle, admitted.credential))?;

        info!(
            "WebSocket connection {} registered for user {}",
            connection_id, identity
        );

        Ok(Registration {
            connection_id,
            identity,
            state: ConnectionState::Registered,
            registry: Arc::clone(&self.registry),
            subscriptions: Arc::clone(&self.subscriptions),
        })
    }
}

/// Scoped ownership of a registered connection.
///
/// Deregistration runs from `close` on the normal path and from `Drop` on
/// every other path (error return, panic, task cancellation).
pub struct Registration {
    connection_id: ConnectionId,
    identity: Identity,
    state: ConnectionState,
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<Subscriptions>,
}

impl Registration {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Transport reported the connection as closed.
    pub fn close(mut self) -> Option<Identity> {
        self.release()
    }

    fn release(&mut self) -> Option<Identity> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;

        let dropped_topics = self.subscriptions.remove_connection(&self.connection_id);
        let removed = self.registry.deregister(&self.connection_id);

        // `None` here means the dispatcher already evicted a dead connection.
        info!(
            "WebSocket connection {} for user {} closed ({} subscription(s) dropped, {})",
            self.connection_id,
            self.identity,
            dropped_topics,
            if removed.is_some() {
                "deregistered"
            } else {
                "already evicted"
            }
        );
        removed
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            debug!(
                "Connection {} left its handler without an explicit close",
                self.connection_id
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use tokio::sync::mpsc;

    fn setup() -> (Coordinator, Arc<ConnectionRegistry>, Arc<Subscriptions>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(Subscriptions::new());
        (
            Coordinator::new(registry.clone(), subscriptions.clone()),
            registry,
            subscriptions,
        )
    }

    fn admitted(identity: i64) -> Admitted {
        Admitted {
            identity: Identity::new(identity),
            credential: SecretString::from("token".to_string()),
            user: None,
        }
    }

    fn new_handle() -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(4);
        ConnectionHandle::new(ConnectionId::new(), tx)
    }

    #[test]
    fn test_open_then_close_registers_and_deregisters_once() {
        let (coordinator, registry, _) = setup();
        let registration = coordinator.on_open(new_handle(), admitted(1)).unwrap();

        assert_eq!(registration.state(), ConnectionState::Registered);
        assert_eq!(registry.active_count(&Identity::new(1)), 1);

        assert_eq!(registration.close(), Some(Identity::new(1)));
        assert_eq!(registry.active_count(&Identity::new(1)), 0);
        assert!(registry.all_active_identities().is_empty());
    }

    #[test]
    fn test_drop_without_close_still_deregisters() {
        let (coordinator, registry, subscriptions) = setup();
        {
            let registration = coordinator.on_open(new_handle(), admitted(2)).unwrap();
            subscriptions.subscribe(registration.connection_id(), "news");
            assert!(registry.has_active(&Identity::new(2)));
        }
        assert!(!registry.has_active(&Identity::new(2)));
        assert_eq!(subscriptions.topic_count(), 0);
    }

    #[test]
    fn test_error_path_deregisters() {
        fn handler(coordinator: &Coordinator) -> Result<(), String> {
            let _registration = coordinator
                .on_open(new_handle(), admitted(3))
                .map_err(|e| e.to_string())?;
            Err("socket reset".to_string())
        }

        let (coordinator, registry, _) = setup();
        assert!(handler(&coordinator).is_err());
        assert_eq!(registry.total_active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_task_deregisters() {
        let (coordinator, registry, _) = setup();
        let task = tokio::spawn(async move {
            let _registration = coordinator.on_open(new_handle(), admitted(4)).unwrap();
            std::future::pending::<()>().await;
        });

        while !registry.has_active(&Identity::new(4)) {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!registry.has_active(&Identity::new(4)));
    }

    #[test]
    fn test_close_after_eviction_is_tolerated() {
        let (coordinator, registry, _) = setup();
        let registration = coordinator.on_open(new_handle(), admitted(5)).unwrap();

        registry.deregister(registration.connection_id());
        assert_eq!(registration.close(), None);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_handle_is_an_invariant_violation() {
        let (coordinator, registry, _) = setup();
        let handle = new_handle();

        let first = coordinator.on_open(handle.clone(), admitted(6)).unwrap();
        let err = match coordinator.on_open(handle, admitted(6)) {
            Err(e) => e,
            Ok(_) => panic!("second registration of the same handle must fail"),
        };
        assert!(err.is_invariant_violation());
        assert_eq!(registry.active_count(&Identity::new(6)), 1);

        first.close();
        assert_eq!(registry.total_active_count(), 0);
    }
}
