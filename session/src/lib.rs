//! Authenticated real-time session infrastructure.
//!
//! This crate gates, tracks and addresses the WebSocket connections that
//! browser and mobile clients hold open against the backend.
//!
//! # Architecture
//!
//! - **Admission gate**: every handshake is checked for a bearer credential
//!   (query parameter first, then the `Authorization` header) and the
//!   credential is verified before the upgrade is allowed to complete.
//!   Rejections never reach the transport.
//! - **Single-lock registry**: the identity -> connections index and the
//!   connection -> session entry index share one lock, so no reader ever sees
//!   one updated without the other and an identity with no connections is
//!   never left behind.
//! - **Scoped registration**: the lifecycle coordinator hands out a
//!   `Registration` guard; closing or dropping it deregisters the connection
//!   exactly once, whatever path the connection handler leaves by.
//! - **User, Topic and Broadcast scopes**: messages go to one user's
//!   connections, to a topic's subscribers, or to everybody. A slow or dead
//!   connection never holds up delivery to the others.
//! - **Ephemeral messages**: nothing is persisted; an offline user misses the
//!   event.
//!
//! # Message Flow
//!
//! 1. Client opens `/ws?token=...` (or sends `Authorization: Bearer ...`)
//! 2. `admission::Gate` verifies the token and yields an `Admitted` identity
//! 3. The upgrade completes and `Manager::open_connection` registers the
//!    connection, returning its `Registration`
//! 4. Domain code publishes a `DomainEvent`; `SessionDomainEventHandler`
//!    converts it and calls `Manager::send_message`
//! 5. When the socket closes the `Registration` is closed (or dropped) and the
//!    connection disappears from the registry
//!
//! # Example: Sending an event
//!
//! ```rust,ignore
//! use session::message::{Event, Message, MessageScope};
//!
//! app_state.session_manager.send_message(Message {
//!     event: Event::Notification { payload },
//!     scope: MessageScope::User { identity },
//! });
//! ```
//!
//! # Modules
//!
//! - `admission`: handshake gate, verifier/resolver traits
//! - `connection`: identity and connection types, `ConnectionRegistry`
//! - `lifecycle`: `Coordinator` and the `Registration` guard
//! - `manager`: message routing and the management query surface
//! - `message`: wire event and scope definitions
//! - `subscription`: topic subscription table

pub mod admission;
pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod message;
pub mod subscription;

pub use connection::{ConnectionHandle, ConnectionId, Identity};
pub use domain_event_handler::SessionDomainEventHandler;
pub use error::{Error, ErrorKind};
pub use manager::Manager;
