use crate::connection::Identity;
use axum::extract::ws::Message as Frame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trait for getting the wire event type name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Events the server pushes to a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    // Connection lifecycle
    #[serde(rename = "welcome")]
    Welcome {
        connection_id: String,
        user_id: Identity,
    },
    #[serde(rename = "pong")]
    Pong { message: Option<String> },
    #[serde(rename = "subscribed")]
    Subscribed { topic: String },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { topic: String },
    #[serde(rename = "error")]
    Error { message: String },

    // Fan-out (payloads are opaque)
    #[serde(rename = "notification")]
    Notification { payload: Value },
    #[serde(rename = "topic_message")]
    TopicMessage { topic: String, payload: Value },

    // System events
    #[serde(rename = "force_logout")]
    ForceLogout { reason: String },
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::Welcome { .. } => "welcome",
            Event::Pong { .. } => "pong",
            Event::Subscribed { .. } => "subscribed",
            Event::Unsubscribed { .. } => "unsubscribed",
            Event::Error { .. } => "error",
            Event::Notification { .. } => "notification",
            Event::TopicMessage { .. } => "topic_message",
            Event::ForceLogout { .. } => "force_logout",
        }
    }
}

impl Event {
    /// Serialize into a text frame ready for a connection's outbound queue.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(Frame::Text(json.into()))
    }
}

/// Messages a connected client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "data")]
    Data {
        data: Value,
        #[serde(default)]
        kind: Option<String>,
    },
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
}

#[derive(Debug, Clone)]
pub struct Message {
    pub event: Event,
    pub scope: MessageScope,
}

#[derive(Debug, Clone)]
pub enum MessageScope {
    /// Send to all connections for a specific user
    User { identity: Identity },
    /// Send to all connections subscribed to a topic
    Topic { topic: String },
    /// Send to all connected users
    Broadcast,
}
