//! One upgraded WebSocket connection.
//!
//! The session owns the outbound half of the socket behind its own lock, so
//! writes to one peer are serialized without blocking writes to any other.

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Outbound half of a WebSocket connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

pub struct Session {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    open: AtomicBool,
    last_activity: Mutex<Instant>,
    sink: tokio::sync::Mutex<FrameSink>,
    closed: Notify,
}

impl Session {
    pub fn new<S>(peer_addr: Option<SocketAddr>, sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id: SessionId::next(),
            peer_addr,
            open: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            sink: tokio::sync::Mutex::new(Box::pin(sink)),
            closed: Notify::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Time since the last frame in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            open: self.is_open(),
            idle_for: self.idle_for(),
        }
    }

    /// Write one message and flush it.
    pub async fn write(&self, message: Message) -> Result<(), axum::Error> {
        if !self.is_open() {
            return Err(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session closed",
            )));
        }
        let mut sink = self.sink.lock().await;
        sink.send(message).await?;
        self.touch();
        Ok(())
    }

    /// Mark the session closed and wake its read loop. Returns false if it
    /// was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            self.closed.notify_one();
        }
        was_open
    }

    /// Resolves once the session has been marked closed.
    pub async fn closed(&self) {
        if !self.is_open() {
            return;
        }
        self.closed.notified().await;
    }

    /// Best-effort close handshake, bounded by `timeout`.
    pub(crate) async fn send_close(&self, timeout: Duration) {
        let close = async {
            let mut sink = self.sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(timeout, close).await.is_err() {
            tracing::debug!(session = %self.id, "Close handshake timed out");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: Option<SocketAddr>,
    pub open: bool,
    pub idle_for: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn discard() -> impl Sink<Message, Error = axum::Error> + Send {
        sink::drain::<Message>().sink_map_err(|never| -> axum::Error { match never {} })
    }

    #[test]
    fn ids_are_unique_and_displayable() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("ws-"));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let session = Session::new(None, discard());
        assert!(session.write(Message::Text("a".into())).await.is_ok());

        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert!(!session.is_open());
        assert!(session.write(Message::Text("b".into())).await.is_err());
    }

    #[tokio::test]
    async fn closed_resolves_after_mark_closed() {
        let session = std::sync::Arc::new(Session::new(None, discard()));
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.closed().await })
        };
        session.mark_closed();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() never resolved")
            .unwrap();
    }
}
