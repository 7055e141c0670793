//! Listener Traits and Registry
//!
//! This module provides the observer interfaces the core notifies and the
//! weak-reference registry backing them. Sources hold listeners weakly: a
//! registration never extends the listener's lifetime, and entries whose
//! owner dropped are pruned on the next use.
//!
//! Callbacks run on whichever context produced the event (for messages,
//! the client's frame-reception task). A listener that touches a UI must
//! re-dispatch onto its own thread; the core only guarantees one callback
//! per event, in order.

use std::sync::{Arc, Mutex, Weak};

use crate::protocol::CapturedMessage;

/// Connection lifecycle observer for a protocol client.
pub trait ClientListener: Send + Sync {
    /// The client established a session with the remote process.
    fn on_connected(&self);

    /// The session ended, whether via `close()` or a dropped connection.
    fn on_disconnected(&self);
}

/// New-message observer.
///
/// Receives every decoded message, control messages included; implementations
/// that only render traffic should branch on
/// [`is_control`](CapturedMessage::is_control).
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: Arc<CapturedMessage>);
}

/// Weak observer registry with snapshot iteration.
///
/// Registration is idempotent (pointer identity), unregistering an unknown
/// listener is a no-op, and notification walks a snapshot taken up front so
/// listeners may register or unregister from inside a callback.
pub struct ListenerSet<L: ?Sized> {
    entries: Mutex<Vec<Weak<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Registering the same listener twice keeps a
    /// single entry, so it is still notified exactly once per event.
    pub fn register(&self, listener: &Arc<L>) {
        let candidate = Arc::downgrade(listener);
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|entry| entry.strong_count() > 0);
        if !entries.iter().any(|entry| entry.ptr_eq(&candidate)) {
            entries.push(candidate);
        }
    }

    /// Remove a listener; unknown listeners are ignored.
    pub fn unregister(&self, listener: &Arc<L>) {
        let candidate = Arc::downgrade(listener);
        self.entries
            .lock()
            .unwrap()
            .retain(|entry| !entry.ptr_eq(&candidate));
    }

    /// Live listeners at this instant, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Invoke `f` for each registered listener, in registration order.
    pub fn notify<F: FnMut(&L)>(&self, mut f: F) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }
}
