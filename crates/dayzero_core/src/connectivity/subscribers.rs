//! Subscriber registry for online-state changes.
//!
//! A thread-safe registry of callbacks interested in the monitor's
//! combined online/offline state. Unlike a plain event bus, subscribing
//! publishes the *current* state to the new subscriber immediately, so a
//! late subscriber never has to poll before its first notification.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked with the combined online state.
///
/// Callbacks should not block for extended periods; they run on whichever
/// task reported the network signal.
pub type OnlineCallback = std::sync::Arc<dyn Fn(bool) + Send + Sync>;

/// Thread-safe registry of online-state subscribers.
pub struct SubscriberRegistry {
    callbacks: RwLock<HashMap<SubscriptionId, OnlineCallback>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback, immediately publishing `current` to it.
    ///
    /// Returns an id usable with [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, callback: OnlineCallback, current: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        callback(current);
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.insert(id, callback);
        id
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap();
        callbacks.remove(&id).is_some()
    }

    /// Notify all subscribers of a state change.
    ///
    /// Callbacks run synchronously in unspecified order; a panicking
    /// callback does not prevent the others from running.
    pub fn emit(&self, online: bool) {
        let callbacks = self.callbacks.read().unwrap();
        for callback in callbacks.values() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(online);
            }));
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let callbacks = self.callbacks.read().unwrap();
        callbacks.len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
