//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] covers both the handshake path (which is answered with an
//! HTTP response) and the per-connection path (which is only ever logged,
//! since the peer is usually gone by the time it happens).

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "origin not allowed: http://evil.example"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Errors raised by the relay.
///
/// # Error Code Ranges
///
/// | Range     | Category    | HTTP Status               |
/// |-----------|-------------|---------------------------|
/// | 1000–1999 | Handshake   | 400 / 403                 |
/// | 2000–2999 | Connection  | not sent (log only)       |
/// | 3000–3999 | Server      | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The upgrade handshake could not be completed.
    #[error("handshake failed: {0}")]
    HandshakeFailure(String),

    /// The request `Origin` is missing or not on the allow-list.
    #[error("origin not allowed: {0}")]
    OriginRejected(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// An inbound frame is not valid JSON.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Delivery to one recipient failed.
    #[error("send to {connection_id} failed: {reason}")]
    SendFailure {
        /// Recipient that could not be reached.
        connection_id: ConnectionId,
        /// Why the send failed.
        reason: String,
    },

    /// No frame arrived within the idle window.
    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),

    /// Socket-level error from the WebSocket stack.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::HandshakeFailure(_) => 1001,
            Self::OriginRejected(_) => 1002,
            Self::ConnectionClosed => 2001,
            Self::ProtocolError(_) => 2002,
            Self::SendFailure { .. } => 2003,
            Self::IdleTimeout(_) => 2004,
            Self::Transport(_) => 2005,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::HandshakeFailure(_) | Self::ProtocolError(_) => StatusCode::BAD_REQUEST,
            Self::OriginRejected(_) => StatusCode::FORBIDDEN,
            Self::ConnectionClosed
            | Self::SendFailure { .. }
            | Self::IdleTimeout(_)
            | Self::Transport(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for errors that end a connection without anything
    /// having gone wrong on the server side.
    #[must_use]
    pub const fn is_normal_close(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::IdleTimeout(_))
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
