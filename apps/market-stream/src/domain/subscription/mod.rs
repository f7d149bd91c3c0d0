//! Subscriber Registry
//!
//! Per-connection bookkeeping of who wants a symbol's updates.
//!
//! # Design
//!
//! The registry maps subscription ids to delivery handlers. Fan-out never
//! iterates the live map: it takes a [`SubscriberRegistry::snapshot`] and
//! walks that, so handlers may add or remove registrations mid-pass without
//! entries being skipped or invoked twice. Removing a registration clears
//! its `active` flag, which lets an in-flight pass skip subscribers that
//! left after the snapshot was taken.
//!
//! The registry itself is not synchronized; the owning connection guards it
//! with its state lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier of one subscription. Never reused within a pool.
pub type SubscriptionId = u64;

/// One registration: identity, liveness flag and handler.
///
/// Deliveries to a subscriber are serialized by its own lock, which is also
/// what lets a cached replay go out before any live update.
#[derive(Debug)]
pub struct Subscriber<H: ?Sized> {
    id: SubscriptionId,
    active: AtomicBool,
    delivery: Mutex<()>,
    handler: Arc<H>,
}

impl<H: ?Sized> Subscriber<H> {
    /// Create an active registration.
    #[must_use]
    pub const fn new(id: SubscriptionId, handler: Arc<H>) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            delivery: Mutex::new(()),
            handler,
        }
    }

    /// Subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The registered handler.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Whether the registration is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop all deliveries that have not started yet.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Run `f` with the handler if the registration is still active.
    pub fn deliver<R>(&self, f: impl FnOnce(&H) -> R) -> Option<R> {
        self.exclusive().deliver(f)
    }

    /// Hold this subscriber's delivery lock.
    ///
    /// Other deliveries to the same subscriber wait until the guard drops.
    pub fn exclusive(&self) -> DeliveryGuard<'_, H> {
        DeliveryGuard {
            subscriber: self,
            _lock: self.delivery.lock(),
        }
    }
}

/// Exclusive delivery access to one subscriber.
pub struct DeliveryGuard<'a, H: ?Sized> {
    subscriber: &'a Subscriber<H>,
    _lock: MutexGuard<'a, ()>,
}

impl<H: ?Sized> DeliveryGuard<'_, H> {
    /// Run `f` with the handler if the registration is still active.
    pub fn deliver<R>(&self, f: impl FnOnce(&H) -> R) -> Option<R> {
        self.subscriber
            .is_active()
            .then(|| f(&self.subscriber.handler))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Subscription id → handler map for a single connection.
///
/// Iteration order is subscription order, since ids increase monotonically.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use market_stream::domain::subscription::{Subscriber, SubscriberRegistry};
///
/// let mut registry: SubscriberRegistry<str> = SubscriberRegistry::new();
/// registry.add(Arc::new(Subscriber::new(1, Arc::from("first"))));
/// registry.add(Arc::new(Subscriber::new(2, Arc::from("second"))));
///
/// let snapshot = registry.snapshot();
/// assert!(registry.remove(1));
///
/// // The snapshot still holds both entries, but the removed one is inactive.
/// assert_eq!(snapshot.len(), 2);
/// assert!(!snapshot[0].is_active());
/// assert!(snapshot[1].is_active());
/// ```
#[derive(Debug)]
pub struct SubscriberRegistry<H: ?Sized> {
    entries: BTreeMap<SubscriptionId, Arc<Subscriber<H>>>,
}

impl<H: ?Sized> Default for SubscriberRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> SubscriberRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a subscriber.
    ///
    /// Returns `false` (and leaves the registry untouched) if its id is
    /// already registered.
    pub fn add(&mut self, subscriber: Arc<Subscriber<H>>) -> bool {
        let id = subscriber.id();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, subscriber);
        true
    }

    /// Remove exactly one registration.
    ///
    /// Returns `true` if the id was registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.remove(&id).is_some_and(|subscriber| {
            subscriber.deactivate();
            true
        })
    }

    /// Remove every registration, returning them.
    pub fn clear(&mut self) -> Vec<Arc<Subscriber<H>>> {
        let drained: Vec<_> = std::mem::take(&mut self.entries).into_values().collect();
        for subscriber in &drained {
            subscriber.deactivate();
        }
        drained
    }

    /// Stable copy of the current registrations for fan-out.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Subscriber<H>>> {
        self.entries.values().cloned().collect()
    }

    /// Whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no one is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
