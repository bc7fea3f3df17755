//! Subscriber Registry - Observer Sets with Disposers
//!
//! Each inbound stream (messages, notifications, typing) has its own
//! `SubscriberRegistry`. Subscribing returns a [`Subscription`] whose
//! [`unsubscribe`](Subscription::unsubscribe) removes exactly that entry.
//!
//! # Architecture
//!
//! ```text
//!                   SubscriberRegistry<T>
//!            ┌──────────────────────────────────────┐
//!            │ HashMap<SubscriptionId, Callback<T>> │
//!            │   - wrapped in Arc<RwLock<>>         │
//!            └──────────────────┬───────────────────┘
//!                               │ Weak
//!                   ┌───────────┼───────────┐
//!             Subscription  Subscription  Subscription
//! ```
//!
//! # Dispatch Semantics
//!
//! Dispatch snapshots the current ids, then looks each one up again right
//! before invoking it, with no lock held during the call. Callbacks may
//! therefore subscribe or unsubscribe re-entrantly:
//!
//! - an entry removed before it is visited is skipped
//! - an entry removed after it was visited is unaffected
//! - an entry added during dispatch is first invoked on the next frame
//!
//! Invocation order is unspecified.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Opaque identifier of one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Entries<T> = RwLock<HashMap<SubscriptionId, Callback<T>>>;

/// Type-erased removal, so `Subscription` need not carry the event type
trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId) -> bool;
}

impl<T> Detach for Entries<T> {
    fn detach(&self, id: SubscriptionId) -> bool {
        self.write().remove(&id).is_some()
    }
}

/// A set of callbacks receiving events of type `T`
pub struct SubscriberRegistry<T> {
    entries: Arc<Entries<T>>,
}

impl<T> Clone for SubscriberRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T> fmt::Debug for SubscriberRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<T: 'static> SubscriberRegistry<T> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    ///
    /// Every call creates a distinct entry, even for the same closure.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.entries.write().insert(id, Arc::new(callback));

        let weak = Arc::downgrade(&self.entries);
        let entries: Weak<dyn Detach> = weak;
        Subscription { id, entries }
    }

    /// Invoke every current subscriber once with `event`
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, event: &T) -> usize {
        let ids: Vec<SubscriptionId> = self.entries.read().keys().copied().collect();

        let mut invoked = 0;
        for id in ids {
            let callback = self.entries.read().get(&id).cloned();
            if let Some(callback) = callback {
                callback(event);
                invoked += 1;
            }
        }
        invoked
    }

    /// Remove every subscriber
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Whether `id` is still registered
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.read().contains_key(&id)
    }
}

impl<T> SubscriberRegistry<T> {
    /// Number of registered callbacks
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no callbacks are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Disposer for one registered callback
///
/// Dropping a `Subscription` does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
pub struct Subscription {
    id: SubscriptionId,
    entries: Weak<dyn Detach>,
}

impl Subscription {
    /// The id of the registered callback
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback
    ///
    /// Returns `true` if this call removed it. Calling again, or after the
    /// registry was cleared or dropped, is a no-op returning `false`.
    pub fn unsubscribe(&self) -> bool {
        self.entries
            .upgrade()
            .is_some_and(|entries| entries.detach(self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
