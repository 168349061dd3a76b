//! Registry of live connections and the broadcast fan-out.
//!
//! [`ConnectionRegistry`] maps each [`ConnectionId`] to the outbound half
//! of its connection: a bounded [`mpsc::Sender`] drained by the
//! connection's writer task. The registry never touches sockets directly,
//! so holding its lock never means waiting on the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{RwLock, mpsc};

use super::ConnectionId;
use crate::error::RelayError;

/// A text payload as relayed to recipients. Shared so that fan-out to many
/// recipients clones a pointer rather than the payload.
pub type Frame = Arc<str>;

/// Outcome of a single [`ConnectionRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose outbound queue accepted the frame.
    pub delivered: usize,
    /// Recipients that were gone or did not accept the frame in time.
    pub failed: usize,
}

/// The set of currently open connections.
///
/// # Concurrency
///
/// - `register` and `remove` take the write lock for one map operation.
/// - `broadcast` takes the read lock only to copy out a snapshot of the
///   recipients, then sends with no lock held.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection's outbound queue and returns its new id.
    pub async fn register(&self, outbound: mpsc::Sender<Frame>) -> ConnectionId {
        let mut map = self.connections.write().await;
        let mut id = ConnectionId::generate();
        while map.contains_key(&id) {
            id = ConnectionId::generate();
        }
        map.insert(id, outbound);
        id
    }

    /// Removes a connection. Returns `false` if it was already gone, which
    /// is not an error.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// Returns `true` if `id` is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Sends `payload` to every registered connection except `sender_id`.
    ///
    /// Sends run concurrently and each one is bounded by `send_timeout`. A
    /// recipient that is closed or stays full past the timeout is counted
    /// as failed; it never holds up the others.
    pub async fn broadcast(
        &self,
        sender_id: ConnectionId,
        payload: Frame,
        send_timeout: Duration,
    ) -> BroadcastReport {
        let recipients = self.snapshot_except(sender_id).await;

        let sends = recipients.into_iter().map(|(id, outbound)| {
            let frame = Arc::clone(&payload);
            async move {
                outbound
                    .send_timeout(frame, send_timeout)
                    .await
                    .map_err(|err| RelayError::SendFailure {
                        connection_id: id,
                        reason: err.to_string(),
                    })
            }
        });

        let mut report = BroadcastReport::default();
        for result in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::warn!(sender = %sender_id, error = %err, "broadcast send failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn snapshot_except(
        &self,
        sender_id: ConnectionId,
    ) -> Vec<(ConnectionId, mpsc::Sender<Frame>)> {
        let map = self.connections.read().await;
        map.iter()
            .filter(|(id, _)| **id != sender_id)
            .map(|(id, outbound)| (*id, outbound.clone()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    async fn join(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.register(tx).await, rx)
    }

    #[tokio::test]
    async fn register_assigns_distinct_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = join(&registry).await;
        let (b, _rx_b) = join(&registry).await;
        assert_ne!(a, b);
        assert!(registry.contains(a).await);
        assert!(registry.contains(b).await);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = join(&registry).await;
        let (other, _rx_other) = join(&registry).await;

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(other).await);
    }

    #[tokio::test]
    async fn size_is_accepts_minus_disconnects() {
        let registry = ConnectionRegistry::new();
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..7 {
            let (id, rx) = join(&registry).await;
            ids.push(id);
            receivers.push(rx);
        }
        for id in ids.iter().take(3) {
            registry.remove(*id).await;
        }
        assert_eq!(registry.len().await, 4);
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let registry = ConnectionRegistry::new();
        let (sender, mut rx_sender) = join(&registry).await;
        let mut others = Vec::new();
        for _ in 0..4 {
            others.push(join(&registry).await);
        }

        let report = registry
            .broadcast(sender, Frame::from(r#"{"x":1,"y":2}"#), TIMEOUT)
            .await;
        assert_eq!(report, BroadcastReport { delivered: 4, failed: 0 });

        for (_, rx) in &mut others {
            let Ok(frame) = rx.try_recv() else {
                panic!("recipient missed the frame");
            };
            assert_eq!(&*frame, r#"{"x":1,"y":2}"#);
        }
        assert!(rx_sender.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_recipient_does_not_block_others() {
        let registry = ConnectionRegistry::new();
        let (sender, _rx_sender) = join(&registry).await;
        let (_gone, rx_gone) = join(&registry).await;
        let (_alive, mut rx_alive) = join(&registry).await;
        drop(rx_gone);

        let report = registry.broadcast(sender, Frame::from("{}"), TIMEOUT).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(rx_alive.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_recipient_times_out_without_blocking_others() {
        let registry = ConnectionRegistry::new();
        let (sender, _rx_sender) = join(&registry).await;

        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let _ = slow_tx.try_send(Frame::from("backlog"));
        registry.register(slow_tx).await;

        let (_fast, mut rx_fast) = join(&registry).await;

        let report = registry.broadcast(sender, Frame::from("{}"), TIMEOUT).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(rx_fast.try_recv().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn churn_during_broadcast_keeps_registry_consistent() {
        const CHURN_TASKS: usize = 8;
        const CYCLES: usize = 200;
        const BROADCASTS: usize = 200;

        let registry = Arc::new(ConnectionRegistry::new());
        let (anchor_tx, mut anchor_rx) = mpsc::channel(BROADCASTS);
        let anchor = registry.register(anchor_tx).await;

        let mut churners = Vec::new();
        for _ in 0..CHURN_TASKS {
            let registry = Arc::clone(&registry);
            churners.push(tokio::spawn(async move {
                for _ in 0..CYCLES {
                    let (tx, _rx) = mpsc::channel(1);
                    let id = registry.register(tx).await;
                    assert!(registry.remove(id).await);
                    assert!(!registry.remove(id).await);
                }
            }));
        }

        let broadcaster = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let outsider = ConnectionId::generate();
                let mut reports = Vec::with_capacity(BROADCASTS);
                for _ in 0..BROADCASTS {
                    reports.push(
                        registry
                            .broadcast(outsider, Frame::from("{}"), Duration::from_millis(5))
                            .await,
                    );
                }
                reports
            })
        };

        for churner in churners {
            let Ok(()) = churner.await else {
                panic!("churn task failed");
            };
        }
        let Ok(reports) = broadcaster.await else {
            panic!("broadcast task failed");
        };

        assert!(reports.iter().all(|r| r.delivered >= 1));
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(anchor).await);

        let mut received = 0;
        while anchor_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, BROADCASTS);
    }

    #[tokio::test]
    async fn lone_sender_reaches_nobody() {
        let registry = ConnectionRegistry::new();
        let (sender, _rx) = join(&registry).await;
        let report = registry.broadcast(sender, Frame::from("{}"), TIMEOUT).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
