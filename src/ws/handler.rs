//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};

use super::connection::{ConnectionSettings, run_connection};
use crate::app_state::AppState;
use crate::error::RelayError;

/// `GET /ws` — Upgrade to a relay WebSocket.
///
/// The `Origin` header must pass the configured allow-list; otherwise the
/// handshake is answered with `403` and nothing is registered.
///
/// # Errors
///
/// Returns [`RelayError::OriginRejected`] for a missing or non-listed
/// origin and [`RelayError::HandshakeFailure`] for an unreadable one.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, RelayError> {
    let origin = headers
        .get(header::ORIGIN)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| RelayError::HandshakeFailure("origin header is not visible ASCII".to_string()))?;

    if !state.config.allowed_origins.permits(origin) {
        let origin = origin.unwrap_or("<none>");
        tracing::warn!(origin, "rejected websocket handshake");
        return Err(RelayError::OriginRejected(origin.to_string()));
    }

    let registry = Arc::clone(&state.registry);
    let settings = ConnectionSettings::from(state.config.as_ref());

    Ok(ws
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_connection(socket, registry, settings))
        .into_response())
}
