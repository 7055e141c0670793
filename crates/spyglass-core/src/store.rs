//! Message Store
//!
//! Ordered, append-only collection of captured messages: the single source
//! of truth for one connection attempt. The store is created fresh (or
//! drained via [`clear`](MessageStore::clear)) whenever the user connects to
//! a new device.
//!
//! The store implements [`MessageListener`] so it can be registered directly
//! on a client and fed from the frame-reception task while presentation code
//! reads it from its own thread.

use std::sync::{Arc, Mutex};

use crate::events::{ListenerSet, MessageListener};
use crate::protocol::CapturedMessage;

/// Ordered capture store with change notification.
///
/// Insertion order is arrival order. Control messages are stored alongside
/// traffic (they are part of the session record) but are excluded from
/// [`timeline`](Self::timeline), the view generic timeline renderings
/// consume; store listeners receive them and branch on the control code.
#[derive(Default)]
pub struct MessageStore {
    messages: Mutex<Vec<Arc<CapturedMessage>>>,
    listeners: ListenerSet<dyn MessageListener>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and notify listeners.
    ///
    /// Listeners run synchronously in registration order, after the append
    /// is visible: a listener reading the store from its callback sees the
    /// new message already present.
    pub fn append(&self, message: Arc<CapturedMessage>) {
        self.messages.lock().unwrap().push(message.clone());
        self.listeners.notify(|l| l.on_message(message.clone()));
    }

    /// Drop all messages.
    ///
    /// Deliberately does not notify listeners: a reset is caller-initiated,
    /// and the caller owns whatever refresh its views need. Safe to call
    /// while messages are still arriving; an in-flight append lands either
    /// entirely before or entirely after the clear.
    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().unwrap().is_empty()
    }

    /// Message at `index` in arrival order.
    pub fn get(&self, index: usize) -> Option<Arc<CapturedMessage>> {
        self.messages.lock().unwrap().get(index).cloned()
    }

    /// Every stored message, in arrival order.
    pub fn snapshot(&self) -> Vec<Arc<CapturedMessage>> {
        self.messages.lock().unwrap().clone()
    }

    /// Stored traffic in arrival order, control messages excluded.
    pub fn timeline(&self) -> Vec<Arc<CapturedMessage>> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_control())
            .cloned()
            .collect()
    }

    /// Register a store listener; registering twice keeps a single entry.
    pub fn register_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.listeners.register(listener);
    }

    /// Unregister a store listener; unknown listeners are ignored.
    pub fn unregister_listener(&self, listener: &Arc<dyn MessageListener>) {
        self.listeners.unregister(listener);
    }
}

impl MessageListener for MessageStore {
    fn on_message(&self, message: Arc<CapturedMessage>) {
        self.append(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(id: &str) -> Arc<CapturedMessage> {
        Arc::new(
            crate::protocol::decode_frame(
                &serde_json::json!({ "messageId": id, "requestId": id, "method": "GET" })
                    .to_string(),
            )
            .unwrap(),
        )
    }

    fn control_message(id: &str) -> Arc<CapturedMessage> {
        Arc::new(
            crate::protocol::decode_frame(
                &serde_json::json!({ "messageId": id, "controlCode": 1, "controlData": {} })
                    .to_string(),
            )
            .unwrap(),
        )
    }

    #[derive(Default)]
    struct CountingListener {
        seen: AtomicUsize,
    }

    impl MessageListener for CountingListener {
        fn on_message(&self, _message: Arc<CapturedMessage>) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_enumeration_order_is_append_order() {
        let store = MessageStore::new();
        for id in ["a", "b", "c", "d"] {
            store.append(message(id));
        }

        let ids: Vec<_> = store
            .snapshot()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(2).unwrap().message_id, "c");
        assert!(store.get(4).is_none());
    }

    #[test]
    fn test_clear_empties_regardless_of_size() {
        let store = MessageStore::new();
        for i in 0..100 {
            store.append(message(&format!("m-{i}")));
        }

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.get(0).is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_registration_notifies_once() {
        let store = MessageStore::new();
        let counter = Arc::new(CountingListener::default());
        let as_listener: Arc<dyn MessageListener> = counter.clone();

        store.register_listener(&as_listener);
        store.register_listener(&as_listener);
        store.append(message("a"));

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_sees_message_already_appended() {
        struct Checker {
            store: Arc<MessageStore>,
            observed_len: AtomicUsize,
        }

        impl MessageListener for Checker {
            fn on_message(&self, _message: Arc<CapturedMessage>) {
                self.observed_len
                    .store(self.store.len(), Ordering::SeqCst);
            }
        }

        let store = Arc::new(MessageStore::new());
        let checker = Arc::new(Checker {
            store: store.clone(),
            observed_len: AtomicUsize::new(0),
        });
        let as_listener: Arc<dyn MessageListener> = checker.clone();
        store.register_listener(&as_listener);

        store.append(message("a"));

        assert_eq!(checker.observed_len.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_during_notification() {
        struct SelfRemover {
            store: Mutex<Option<Arc<MessageStore>>>,
            this: Mutex<Option<Arc<dyn MessageListener>>>,
            seen: AtomicUsize,
        }

        impl MessageListener for SelfRemover {
            fn on_message(&self, _message: Arc<CapturedMessage>) {
                self.seen.fetch_add(1, Ordering::SeqCst);
                let store = self.store.lock().unwrap().take();
                let this = self.this.lock().unwrap().take();
                if let (Some(store), Some(this)) = (store, this) {
                    store.unregister_listener(&this);
                }
            }
        }

        let store = Arc::new(MessageStore::new());
        let remover = Arc::new(SelfRemover {
            store: Mutex::new(Some(store.clone())),
            this: Mutex::new(None),
            seen: AtomicUsize::new(0),
        });
        let as_listener: Arc<dyn MessageListener> = remover.clone();
        *remover.this.lock().unwrap() = Some(as_listener.clone());
        store.register_listener(&as_listener);

        store.append(message("a"));
        store.append(message("b"));

        // Removed itself during the first callback; never notified again.
        assert_eq!(remover.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeline_excludes_control_messages() {
        let store = MessageStore::new();
        store.append(message("a"));
        store.append(control_message("ctl"));
        store.append(message("b"));

        let timeline: Vec<_> = store
            .timeline()
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        assert_eq!(timeline, vec!["a", "b"]);

        // The control message is still part of the stored sequence.
        assert_eq!(store.len(), 3);
        assert!(store.get(1).unwrap().is_control());
    }

    #[test]
    fn test_store_feeds_itself_as_message_listener() {
        let store = Arc::new(MessageStore::new());
        let as_listener: Arc<dyn MessageListener> = store.clone();

        as_listener.on_message(message("a"));

        assert_eq!(store.len(), 1);
    }
}
