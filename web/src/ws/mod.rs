//! WebSocket HTTP handler for the web layer.
//!
//! Only the Axum side of a connection lives here: admission extraction, the
//! upgrade, and the per-connection read/write loop. Registry, routing and
//! message types live in the `session` crate.

pub mod handler;
