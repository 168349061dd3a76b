//! Domain layer: connection identity and the connection registry.
//!
//! Nothing here knows about axum or sockets. A connection is represented
//! by the outbound queue its writer task drains, which keeps the registry
//! testable with plain channels.

pub mod connection_id;
pub mod registry;

pub use connection_id::ConnectionId;
pub use registry::{BroadcastReport, ConnectionRegistry, Frame};
