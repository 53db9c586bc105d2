//! In-flight handler tracking and shutdown signalling.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count handlers that are still executing (requests and WebSocket sessions)
//! - Broadcast the "server is stopping" signal to long-lived handlers
//! - Let `stop()` wait until every tracked handler has exited

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection context attached to every request as an extension.
///
/// Counts requests served on the connection so the keep-alive request cap
/// can be enforced.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    requests: Arc<AtomicU64>,
}

impl ConnectionContext {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one more request on this connection, returning the new total.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Tracks executing handlers for graceful shutdown.
///
/// Uses watch channels both to publish the live count and to signal
/// long-lived handlers that the server is stopping.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of executing handlers.
    active_count: Arc<AtomicU64>,
    /// Publishes the count after every change.
    count_tx: Arc<watch::Sender<u64>>,
    /// Set to true once shutdown begins.
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionTracker {
    /// Create a new tracker.
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            count_tx: Arc::new(count_tx),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Record a new executing handler. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let now = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.count_tx.send_replace(now);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            count_tx: Arc::clone(&self.count_tx),
            id: ConnectionId::new(),
        }
    }

    /// Get current executing handler count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Tell long-lived handlers to wind down.
    pub fn begin_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Receiver that flips to `true` when shutdown begins.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Wait until every tracked handler has exited.
    pub async fn wait_idle(&self) {
        let mut rx = self.count_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|_| self.active_count.load(Ordering::SeqCst) == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a handler's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    count_tx: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this guard's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let now = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.count_tx.send_replace(now);
        tracing::trace!(connection_id = %self.id, "Handler finished");
    }
}

/// Wait until `rx` reports shutdown. Never resolves if the sender is gone
/// without having signalled.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn connection_context_counts_requests() {
        let ctx = ConnectionContext::new("127.0.0.1:1234".parse().unwrap());
        assert_eq!(ctx.record_request(), 1);
        let clone = ctx.clone();
        assert_eq!(clone.record_request(), 2);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        tokio::time::timeout(Duration::from_secs(2), tracker.wait_idle())
            .await
            .expect("tracker never drained");
        assert_eq!(tracker.active_count(), 0);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_late_subscribers() {
        let tracker = ConnectionTracker::new();
        tracker.begin_shutdown();

        let mut rx = tracker.shutdown_receiver();
        tokio::time::timeout(Duration::from_millis(100), shutdown_requested(&mut rx))
            .await
            .expect("late subscriber missed shutdown");
        assert!(tracker.is_shutting_down());
    }
}
