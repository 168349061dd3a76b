//! WebSocket layer: upgrade handshake and the per-connection relay loop.
//!
//! The endpoint at `/ws` accepts text frames holding JSON and relays each
//! one verbatim to every other open connection.

pub mod connection;
pub mod handler;
pub mod messages;
