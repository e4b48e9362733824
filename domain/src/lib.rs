//! Domain layer: the concrete collaborators the real-time session core is
//! wired to.
//!
//! - `jwt`: verifies the access tokens clients present on connect
//! - `user`: resolves an identity to a user record
//! - `error`: layered domain error type

pub mod error;
pub mod jwt;
pub mod user;

pub use session::Identity;
