use crate::connection::ConnectionId;
use dashmap::DashMap;
use std::collections::HashSet;

const MAX_TOPIC_LEN: usize = 128;

/// Trim a client-supplied topic name, refusing empty or oversized names.
pub fn normalize_topic(topic: &str) -> Option<String> {
    let topic = topic.trim();
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return None;
    }
    Some(topic.to_string())
}

/// Topic subscription table with dual indices.
///
/// A connection's own task is the only caller that changes that connection's
/// subscriptions, so the two indices only need per-entry atomicity.
pub struct Subscriptions {
    /// Primary index: topic -> subscribed connections, for fan-out.
    topics: DashMap<String, HashSet<ConnectionId>>,

    /// Secondary index: connection -> its topics, for cleanup on close.
    by_connection: DashMap<ConnectionId, HashSet<String>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    /// Returns `true` if the subscription is new.
    pub fn subscribe(&self, connection_id: &ConnectionId, topic: &str) -> bool {
        let added = self
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.clone());

        self.by_connection
            .entry(connection_id.clone())
            .or_default()
            .insert(topic.to_string());

        added
    }

    /// Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, topic: &str) -> bool {
        let removed = self.remove_from_topic(connection_id, topic);

        if let Some(mut topics) = self.by_connection.get_mut(connection_id) {
            topics.remove(topic);
        }
        self.by_connection
            .remove_if(connection_id, |_, topics| topics.is_empty());

        removed
    }

    /// Drop every subscription a connection holds. Returns how many there were.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> usize {
        let Some((_, topics)) = self.by_connection.remove(connection_id) else {
            return 0;
        };

        for topic in topics.iter() {
            self.remove_from_topic(connection_id, topic);
        }
        topics.len()
    }

    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topics_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .by_connection
            .get(connection_id)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn remove_from_topic(&self, connection_id: &ConnectionId, topic: &str) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut ids) => ids.remove(connection_id),
            None => false,
        };
        // remove_if re-checks under the shard lock, so a subscribe that raced
        // in after the removal above keeps its entry.
        self.topics.remove_if(topic, |_, ids| ids.is_empty());
        removed
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}
