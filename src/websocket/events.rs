//! Application callbacks for WebSocket traffic.
//!
//! Listeners are the only way application code observes sessions; frame
//! contents are opaque to the server.

use std::sync::{Arc, PoisonError, RwLock};

use crate::websocket::frame::Frame;
use crate::websocket::session::{SessionId, SessionInfo};

/// Receives session lifecycle and traffic events.
///
/// Callbacks run on the session's task; anything slow should be spawned.
pub trait WebSocketListener: Send + Sync {
    fn on_open(&self, _session: &SessionInfo) {}

    fn on_frame(&self, _session: SessionId, _frame: &Frame) {}

    /// Called exactly once per session, whichever side closed it.
    fn on_close(&self, _session: SessionId) {}
}

/// Registered listeners, notified in registration order.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn WebSocketListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn WebSocketListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove every registration of `listener`. Removing an unknown listener
    /// is a no-op.
    pub fn remove(&self, listener: &Arc<dyn WebSocketListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| {
            !std::ptr::eq(
                Arc::as_ptr(l) as *const (),
                Arc::as_ptr(listener) as *const (),
            )
        });
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Callbacks run on a cloned list so a listener may (un)register others.
    fn snapshot(&self) -> Vec<Arc<dyn WebSocketListener>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn emit_open(&self, session: &SessionInfo) {
        for listener in self.snapshot() {
            listener.on_open(session);
        }
    }

    pub fn emit_frame(&self, session: SessionId, frame: &Frame) {
        for listener in self.snapshot() {
            listener.on_frame(session, frame);
        }
    }

    pub fn emit_close(&self, session: SessionId) {
        for listener in self.snapshot() {
            listener.on_close(session);
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        frames: AtomicUsize,
        closes: AtomicUsize,
    }

    impl WebSocketListener for Counter {
        fn on_frame(&self, _session: SessionId, _frame: &Frame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn on_close(&self, _session: SessionId) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn events_reach_registered_listeners_only() {
        let set = ListenerSet::new();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn WebSocketListener> = counter.clone();
        set.add(listener.clone());

        let id = SessionId::next();
        set.emit_frame(id, &Frame::text("a"));
        set.emit_close(id);
        assert_eq!(counter.frames.load(Ordering::SeqCst), 1);
        assert_eq!(counter.closes.load(Ordering::SeqCst), 1);

        assert!(set.remove(&listener));
        assert!(!set.remove(&listener));
        set.emit_frame(id, &Frame::text("b"));
        assert_eq!(counter.frames.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }
}
