//! Per-connection relay loop.
//!
//! Each upgraded socket is split in two. The read half stays in
//! [`run_connection`], which receives frames and broadcasts them; the
//! write half moves into a writer task that drains the connection's
//! outbound queue and sends heartbeats. The registry only ever holds the
//! queue's sender.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::messages::{ConnectionState, validate_payload};
use crate::config::RelayConfig;
use crate::domain::{BroadcastReport, ConnectionId, ConnectionRegistry, Frame};
use crate::error::RelayError;

/// Per-connection knobs, copied out of [`RelayConfig`] at upgrade time.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bound on each queued send and each socket write.
    pub send_timeout: Duration,
    /// Close after this long without an inbound frame.
    pub idle_timeout: Option<Duration>,
    /// Ping period.
    pub heartbeat_interval: Option<Duration>,
    /// Outbound queue capacity.
    pub outbound_buffer: usize,
    /// Drop non-JSON frames instead of relaying them.
    pub drop_malformed: bool,
}

impl From<&RelayConfig> for ConnectionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            send_timeout: config.send_timeout,
            idle_timeout: config.idle_timeout,
            heartbeat_interval: config.heartbeat_interval,
            outbound_buffer: config.outbound_buffer.max(1),
            drop_malformed: config.drop_malformed,
        }
    }
}

/// Registers the socket, relays its frames until it closes, then removes
/// it from the registry.
///
/// Errors end only this connection. They are logged and never returned.
pub async fn run_connection(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
) {
    let mut state = ConnectionState::Connecting;
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_buffer);

    let id = registry.register(outbound_tx).await;
    state = advance(state, ConnectionState::Open, id);
    tracing::info!(connection_id = %id, "connection opened");

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound_rx,
        settings.send_timeout,
        settings.heartbeat_interval,
    ));
    let mut writer_finished = false;

    let outcome = loop {
        tokio::select! {
            received = receive(&mut ws_rx, settings.idle_timeout) => match received {
                Ok(text) => {
                    relay(&registry, id, text.as_str(), &settings).await;
                    state = advance(state, ConnectionState::Open, id);
                }
                Err(err) => break err,
            },
            joined = &mut writer => {
                writer_finished = true;
                break writer_outcome(joined);
            }
        }
    };

    if !state.is_terminal() {
        registry.remove(id).await;
        state = advance(state, ConnectionState::Closed, id);
    }

    // With the registry's sender gone the writer sends Close and exits.
    if !writer_finished
        && tokio::time::timeout(settings.send_timeout, &mut writer)
            .await
            .is_err()
    {
        writer.abort();
    }

    if outcome.is_normal_close() {
        tracing::info!(connection_id = %id, reason = %outcome, state = ?state, "connection closed");
    } else {
        tracing::warn!(connection_id = %id, error = %outcome, state = ?state, "connection closed with error");
    }
}

/// Waits for the next text frame.
///
/// Control frames are consumed here; binary frames are skipped.
async fn receive(
    ws_rx: &mut SplitStream<WebSocket>,
    idle_timeout: Option<Duration>,
) -> Result<Utf8Bytes, RelayError> {
    loop {
        let next = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, ws_rx.next())
                .await
                .map_err(|_| RelayError::IdleTimeout(limit))?,
            None => ws_rx.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => return Err(RelayError::ConnectionClosed),
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(len = data.len(), "ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(err)) => return Err(RelayError::Transport(err.to_string())),
        }
    }
}

/// Broadcasts one inbound payload from `id`. Returns `None` when the
/// payload was dropped as malformed.
async fn relay(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    text: &str,
    settings: &ConnectionSettings,
) -> Option<BroadcastReport> {
    if let Err(err) = validate_payload(text) {
        if settings.drop_malformed {
            tracing::warn!(connection_id = %id, error = %err, "dropping malformed payload");
            return None;
        }
        tracing::warn!(connection_id = %id, error = %err, "relaying malformed payload");
    }

    let report = registry
        .broadcast(id, Frame::from(text), settings.send_timeout)
        .await;
    tracing::debug!(
        connection_id = %id,
        delivered = report.delivered,
        failed = report.failed,
        "payload relayed"
    );
    Some(report)
}

/// Drains the outbound queue into the socket and sends heartbeats.
///
/// Returns `Ok(())` once the queue is closed, i.e. the connection has been
/// removed from the registry.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    send_timeout: Duration,
    heartbeat_interval: Option<Duration>,
) -> Result<(), RelayError> {
    let mut heartbeat = heartbeat_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let message = tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(frame) => Message::text(&*frame),
                None => {
                    let _ = send_bounded(&mut ws_tx, Message::Close(None), send_timeout).await;
                    return Ok(());
                }
            },
            () = next_heartbeat(&mut heartbeat) => Message::Ping(Bytes::new()),
        };
        send_bounded(&mut ws_tx, message, send_timeout).await?;
    }
}

async fn next_heartbeat(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn send_bounded(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    limit: Duration,
) -> Result<(), RelayError> {
    match tokio::time::timeout(limit, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(RelayError::Transport(err.to_string())),
        Err(_) => Err(RelayError::Transport(format!(
            "write timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

fn writer_outcome(joined: Result<Result<(), RelayError>, JoinError>) -> RelayError {
    match joined {
        Ok(Ok(())) => RelayError::ConnectionClosed,
        Ok(Err(err)) => err,
        Err(err) => RelayError::Internal(err.to_string()),
    }
}

fn advance(state: ConnectionState, next: ConnectionState, id: ConnectionId) -> ConnectionState {
    state.transition(next).unwrap_or_else(|| {
        tracing::warn!(connection_id = %id, from = ?state, to = ?next, "invalid state transition");
        state
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(drop_malformed: bool) -> ConnectionSettings {
        ConnectionSettings {
            drop_malformed,
            ..ConnectionSettings::from(&RelayConfig::default())
        }
    }

    #[tokio::test]
    async fn relay_forwards_malformed_by_default() {
        let registry = ConnectionRegistry::new();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = registry.register(tx_a).await;
        registry.register(tx_b).await;

        let report = relay(&registry, a, "not json", &settings(false)).await;
        assert_eq!(report.map(|r| r.delivered), Some(1));
        assert_eq!(rx_b.try_recv().ok().as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn relay_drops_malformed_when_configured() {
        let registry = ConnectionRegistry::new();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = registry.register(tx_a).await;
        registry.register(tx_b).await;

        assert!(relay(&registry, a, "{oops", &settings(true)).await.is_none());
        assert!(rx_b.try_recv().is_err());

        assert!(relay(&registry, a, r#"{"ok":true}"#, &settings(true)).await.is_some());
        assert_eq!(rx_b.try_recv().ok().as_deref(), Some(r#"{"ok":true}"#));
    }

    #[test]
    fn settings_never_use_zero_capacity() {
        let config = RelayConfig {
            outbound_buffer: 0,
            ..RelayConfig::default()
        };
        assert_eq!(ConnectionSettings::from(&config).outbound_buffer, 1);
    }

    #[test]
    fn clean_writer_exit_reads_as_peer_close() {
        assert!(matches!(writer_outcome(Ok(Ok(()))), RelayError::ConnectionClosed));
        assert!(matches!(
            writer_outcome(Ok(Err(RelayError::Transport("reset".to_string())))),
            RelayError::Transport(_)
        ));
    }

    #[test]
    fn invalid_transition_keeps_state() {
        let id = ConnectionId::generate();
        assert_eq!(
            advance(ConnectionState::Closed, ConnectionState::Open, id),
            ConnectionState::Closed
        );
    }
}
