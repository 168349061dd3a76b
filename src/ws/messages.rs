//! Inbound frame checks and the per-connection state machine.
//!
//! The relay has no message schema. A text frame is parsed as JSON only to
//! tell well-formed payloads from garbage; the original text is what gets
//! relayed.

use crate::error::RelayError;

/// Checks that `text` is a JSON document.
///
/// # Errors
///
/// Returns [`RelayError::ProtocolError`] with the parser's message when it
/// is not.
pub fn validate_payload(text: &str) -> Result<(), RelayError> {
    serde_json::from_str::<serde::de::IgnoredAny>(text)
        .map(|_| ())
        .map_err(|err| RelayError::ProtocolError(err.to_string()))
}

/// Lifecycle of one relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, not yet registered.
    Connecting,
    /// Registered and relaying.
    Open,
    /// Removed from the registry. Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns the state after moving to `next`, or `None` if that move is
    /// not allowed.
    #[must_use]
    pub const fn transition(self, next: Self) -> Option<Self> {
        match (self, next) {
            (Self::Connecting, Self::Open)
            | (Self::Open, Self::Open)
            | (Self::Connecting | Self::Open, Self::Closed) => Some(next),
            _ => None,
        }
    }

    /// Returns `true` once the connection is closed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}
