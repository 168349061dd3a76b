//! Identifier for a live relay connection.

use std::fmt;

use serde::Serialize;

/// Identifier of one registered connection.
///
/// Minted by [`super::ConnectionRegistry::register`] from a fresh UUID v4,
/// so two live connections never share one. It only has meaning while the
/// connection is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
