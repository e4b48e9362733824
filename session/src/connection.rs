use crate::error::{DeliveryErrorKind, Error, InvariantErrorKind};
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use log::*;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc::{error::TrySendError, Sender};

/// The authenticated principal behind a connection: the numeric user id carried
/// in a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(i64);

impl Identity {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<events::Id> for Identity {
    fn from(id: events::Id) -> Self {
        Self(id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a connection (server-generated, never reused)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to one live connection: its id plus the bounded queue its writer
/// task drains. Two handles are equal when their ids are.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: Sender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: Sender<Message>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a frame without waiting. A slow reader fills its own queue and
    /// never holds up anyone else.
    pub fn try_send(&self, message: Message) -> Result<(), DeliveryErrorKind> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryErrorKind::Full,
            TrySendError::Closed(_) => DeliveryErrorKind::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

/// Immutable snapshot taken when a connection is registered.
#[derive(Debug)]
pub struct SessionEntry {
    identity: Identity,
    handle: ConnectionHandle,
    credential: SecretString,
    connected_at: DateTime<Utc>,
}

impl SessionEntry {
    pub fn new(identity: Identity, handle: ConnectionHandle, credential: SecretString) -> Self {
        Self {
            identity,
            handle,
            credential,
            connected_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

#[derive(Default)]
struct RegistryState {
    /// Secondary index: identity -> its live connections. Never holds empty sets.
    by_identity: HashMap<Identity, HashSet<ConnectionId>>,
    /// Primary storage: connection -> session entry (identity, handle, credential).
    by_connection: HashMap<ConnectionId, SessionEntry>,
}

/// Identity <-> connection index.
///
/// Both indices live behind one lock so every `register`/`deregister` is a
/// single critical section; readers copy what they need out of the read
/// guard and never observe one index updated without the other.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Registering an id twice is a lifecycle bug
    /// and is refused without touching either index.
    pub fn register(&self, entry: SessionEntry) -> Result<(), Error> {
        let connection_id = entry.handle.id().clone();
        let identity = entry.identity;

        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.by_connection.contains_key(&connection_id) {
            drop(guard);
            error!(
                "Refusing to register connection {} for user {}: already registered",
                connection_id, identity
            );
            return Err(InvariantErrorKind::DuplicateConnection.into());
        }

        state
            .by_identity
            .entry(identity)
            .or_default()
            .insert(connection_id.clone());
        state.by_connection.insert(connection_id, entry);

        Ok(())
    }

    /// Remove a connection, returning the identity it belonged to. Unknown
    /// (or already removed) connections are a no-op.
    pub fn deregister(&self, connection_id: &ConnectionId) -> Option<Identity> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let entry = state.by_connection.remove(connection_id)?;
        let identity = entry.identity;

        let (reverse_found, now_empty) = match state.by_identity.get_mut(&identity) {
            Some(connections) => {
                let found = connections.remove(connection_id);
                (found, connections.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            state.by_identity.remove(&identity);
        }
        drop(guard);

        if !reverse_found {
            error!(
                "Connection {} for user {} was missing from the identity index ({:?})",
                connection_id,
                identity,
                InvariantErrorKind::MissingReverseIndex
            );
        }

        Some(identity)
    }

    /// Snapshot of the live connections of `identity`.
    pub fn sessions_of(&self, identity: &Identity) -> Vec<ConnectionHandle> {
        let state = self.state.read();
        state
            .by_identity
            .get(identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.by_connection.get(id))
                    .map(|entry| entry.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn identity_of(&self, connection_id: &ConnectionId) -> Option<Identity> {
        self.state
            .read()
            .by_connection
            .get(connection_id)
            .map(|entry| entry.identity)
    }

    pub fn handle_of(&self, connection_id: &ConnectionId) -> Option<ConnectionHandle> {
        self.state
            .read()
            .by_connection
            .get(connection_id)
            .map(|entry| entry.handle.clone())
    }

    /// Copy of the credential the connection was admitted with.
    pub fn credential_of(&self, connection_id: &ConnectionId) -> Option<SecretString> {
        self.state
            .read()
            .by_connection
            .get(connection_id)
            .map(|entry| SecretString::from(entry.credential.expose_secret().to_owned()))
    }

    pub fn connected_at(&self, connection_id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .by_connection
            .get(connection_id)
            .map(|entry| entry.connected_at)
    }

    pub fn active_count(&self, identity: &Identity) -> usize {
        self.state
            .read()
            .by_identity
            .get(identity)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn has_active(&self, identity: &Identity) -> bool {
        self.active_count(identity) > 0
    }

    pub fn total_active_count(&self) -> usize {
        self.state.read().by_connection.len()
    }

    pub fn all_active_identities(&self) -> HashSet<Identity> {
        self.state.read().by_identity.keys().copied().collect()
    }

    /// Snapshot of every live connection, for broadcast.
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.state
            .read()
            .by_connection
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Check that both indices agree with each other. Only meaningful at a
    /// quiescent point; used by tests and diagnostics.
    pub fn check_invariants(&self) -> Result<(), Error> {
        let state = self.state.read();
        let mut indexed = 0usize;

        for (identity, connections) in state.by_identity.iter() {
            if connections.is_empty() {
                return Err(InvariantErrorKind::MissingReverseIndex.into());
            }
            for connection_id in connections {
                match state.by_connection.get(connection_id) {
                    Some(entry) if entry.identity == *identity => indexed += 1,
                    _ => return Err(InvariantErrorKind::MissingReverseIndex.into()),
                }
            }
        }

        if indexed != state.by_connection.len() {
            return Err(InvariantErrorKind::MissingReverseIndex.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, Receiver};

    fn handle() -> (ConnectionHandle, Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(ConnectionId::new(), tx), rx)
    }

    fn entry(identity: i64, handle: &ConnectionHandle) -> SessionEntry {
        SessionEntry::new(
            Identity::new(identity),
            handle.clone(),
            SecretString::from(format!("token-for-{identity}")),
        )
    }

    #[test]
    fn test_register_then_query_single_connection() {
        let registry = ConnectionRegistry::new();
        let u1 = Identity::new(1);
        let (c1, _rx) = handle();

        registry.register(entry(1, &c1)).unwrap();

        assert!(registry.has_active(&u1));
        assert_eq!(registry.active_count(&u1), 1);
        assert_eq!(registry.sessions_of(&u1), vec![c1.clone()]);
        assert_eq!(registry.identity_of(c1.id()), Some(u1));
        assert_eq!(
            registry
                .credential_of(c1.id())
                .unwrap()
                .expose_secret(),
            "token-for-1"
        );
        assert!(registry.connected_at(c1.id()).is_some());
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_second_connection_then_partial_and_full_removal() {
        let registry = ConnectionRegistry::new();
        let u1 = Identity::new(1);
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();

        registry.register(entry(1, &c1)).unwrap();
        registry.register(entry(1, &c2)).unwrap();
        assert_eq!(registry.active_count(&u1), 2);

        assert_eq!(registry.deregister(c1.id()), Some(u1));
        assert_eq!(registry.active_count(&u1), 1);
        assert_eq!(registry.sessions_of(&u1), vec![c2.clone()]);

        assert_eq!(registry.deregister(c2.id()), Some(u1));
        assert!(!registry.has_active(&u1));
        assert!(!registry.all_active_identities().contains(&u1));
        assert!(registry.sessions_of(&u1).is_empty());
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_duplicate_register_is_refused_and_state_untouched() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = handle();

        registry.register(entry(1, &c1)).unwrap();
        let err = registry.register(entry(2, &c1)).unwrap_err();

        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Invariant(InvariantErrorKind::DuplicateConnection)
        );
        assert_eq!(registry.identity_of(c1.id()), Some(Identity::new(1)));
        assert!(!registry.has_active(&Identity::new(2)));
        assert_eq!(registry.total_active_count(), 1);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_double_deregister_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = handle();

        registry.register(entry(5, &c1)).unwrap();
        assert_eq!(registry.deregister(c1.id()), Some(Identity::new(5)));
        assert_eq!(registry.deregister(c1.id()), None);
        assert_eq!(registry.deregister(&ConnectionId::new()), None);
        assert_eq!(registry.total_active_count(), 0);
    }

    #[test]
    fn test_total_count_is_sum_of_per_identity_counts() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut handles = Vec::new();

        for identity in [1, 1, 2, 3, 3, 3] {
            let (h, rx) = handle();
            registry.register(entry(identity, &h)).unwrap();
            receivers.push(rx);
            handles.push(h);
        }
        registry.deregister(handles[3].id());

        let sum: usize = registry
            .all_active_identities()
            .iter()
            .map(|identity| registry.active_count(identity))
            .sum();
        assert_eq!(registry.total_active_count(), sum);
        assert_eq!(registry.total_active_count(), 5);
        assert_eq!(registry.all_connections().len(), 5);
        registry.check_invariants().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_register_then_deregister_leaves_identity_absent() {
        const N: usize = 200;
        let registry = Arc::new(ConnectionRegistry::new());
        let identity = Identity::new(42);

        let (tx, _rx) = mpsc::channel(1);
        let handles: Vec<ConnectionHandle> = (0..N)
            .map(|_| ConnectionHandle::new(ConnectionId::new(), tx.clone()))
            .collect();

        let mut tasks = Vec::new();
        for h in handles.iter().cloned() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .register(SessionEntry::new(
                        identity,
                        h,
                        SecretString::from("t".to_string()),
                    ))
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.active_count(&identity), N);
        registry.check_invariants().unwrap();

        let mut tasks = Vec::new();
        for h in handles.iter().cloned() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                assert_eq!(registry.deregister(h.id()), Some(identity));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.active_count(&identity), 0);
        assert!(!registry.all_active_identities().contains(&identity));
        registry.check_invariants().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_interleaved_register_and_deregister_never_drops_new_connection() {
        // One task churns connect/disconnect for an identity while another
        // keeps a connection for the same identity; the stable connection must
        // survive every "remove empty set" the churn performs.
        let registry = Arc::new(ConnectionRegistry::new());
        let identity = Identity::new(9);
        let (tx, _rx) = mpsc::channel(1);

        let churn = {
            let registry = registry.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let h = ConnectionHandle::new(ConnectionId::new(), tx.clone());
                    registry
                        .register(SessionEntry::new(
                            identity,
                            h.clone(),
                            SecretString::from("t".to_string()),
                        ))
                        .unwrap();
                    registry.deregister(h.id());
                    tokio::task::yield_now().await;
                }
            })
        };

        let stable = ConnectionHandle::new(ConnectionId::new(), tx.clone());
        let adder = {
            let registry = registry.clone();
            let stable = stable.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    registry
                        .register(SessionEntry::new(
                            identity,
                            stable.clone(),
                            SecretString::from("t".to_string()),
                        ))
                        .unwrap();
                    assert!(registry.sessions_of(&identity).contains(&stable));
                    registry.deregister(stable.id());
                    tokio::task::yield_now().await;
                }
                registry
                    .register(SessionEntry::new(
                        identity,
                        stable.clone(),
                        SecretString::from("t".to_string()),
                    ))
                    .unwrap();
            })
        };

        churn.await.unwrap();
        adder.await.unwrap();

        assert_eq!(registry.sessions_of(&identity), vec![stable]);
        registry.check_invariants().unwrap();
    }
}
