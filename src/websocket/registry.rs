//! Live WebSocket sessions and fan-out.
//!
//! # Responsibilities
//! - Track every open session of one WebSocket route
//! - Broadcast a frame to all sessions, or send to one by id
//! - Disconnect one or all sessions
//!
//! # Design Decisions
//! - `DashMap` keyed by `SessionId`; the count is the map length
//! - Bulk operations iterate a snapshot, never the live map, so sessions
//!   closing mid-iteration cannot corrupt it
//! - Each send is bounded by `send_timeout`; a failed or timed-out send
//!   removes that session and nothing else
//! - Broadcast delivers to all sessions concurrently: one slow peer only
//!   costs its own timeout
//! - `unregister` is idempotent since a peer close can race an explicit
//!   disconnect

use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;
use crate::websocket::frame::Frame;
use crate::websocket::session::{Session, SessionId, SessionInfo};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    send_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Add a newly upgraded session.
    pub fn register(&self, session: Arc<Session>) {
        let id = session.id();
        if self.sessions.insert(id, session).is_none() {
            metrics::session_opened();
            tracing::debug!(session = %id, clients = self.sessions.len(), "Session registered");
        }
    }

    /// Remove a session and mark it closed. Removing an absent session is a no-op.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(&id)?;
        session.mark_closed();
        metrics::session_closed();
        tracing::debug!(session = %id, clients = self.sessions.len(), "Session unregistered");
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.snapshot().iter().map(|s| s.info()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        // Clone out of the map so no shard lock is held across an await.
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Send `frame` to every registered session. Returns how many accepted it.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let targets = self.snapshot();
        if targets.is_empty() {
            return 0;
        }

        let deliveries = targets.iter().map(|session| self.deliver(session, frame));
        let delivered = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        tracing::trace!(
            targets = targets.len(),
            delivered,
            opcode = ?frame.opcode(),
            "Broadcast complete"
        );
        delivered
    }

    /// Send `frame` to one session. False if the session is unknown or the
    /// write failed (the session is then removed).
    pub async fn send(&self, id: SessionId, frame: &Frame) -> bool {
        match self.get(id) {
            Some(session) => self.deliver(&session, frame).await,
            None => {
                tracing::debug!(session = %id, "Send to unknown session");
                false
            }
        }
    }

    async fn deliver(&self, session: &Arc<Session>, frame: &Frame) -> bool {
        match tokio::time::timeout(self.send_timeout, session.write(frame.to_message())).await {
            Ok(Ok(())) => {
                metrics::frame_sent();
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(session = %session.id(), error = %e, "Send failed, dropping session");
                metrics::send_failed("write");
                self.unregister(session.id());
                false
            }
            Err(_) => {
                tracing::warn!(
                    session = %session.id(),
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Send timed out, dropping session"
                );
                metrics::send_failed("timeout");
                self.unregister(session.id());
                false
            }
        }
    }

    /// Close and remove one session. False if it was not registered.
    pub async fn disconnect(&self, id: SessionId) -> bool {
        match self.unregister(id) {
            Some(session) => {
                session.send_close(self.send_timeout).await;
                true
            }
            None => false,
        }
    }

    /// Close and remove every session registered when the call starts.
    /// Returns how many were disconnected.
    pub async fn disconnect_all(&self) -> usize {
        let ids = self.ids();
        let results = join_all(ids.into_iter().map(|id| self.disconnect(id))).await;
        let disconnected = results.into_iter().filter(|d| *d).count();
        if disconnected > 0 {
            tracing::info!(disconnected, "Disconnected all sessions");
        }
        disconnected
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}
