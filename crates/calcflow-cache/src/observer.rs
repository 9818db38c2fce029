//! Cache events and subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use calcflow_core::CalcStatus;

use crate::keys::QueryKey;

/// Change notification emitted by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// An entry was written.
    Updated {
        /// Written key.
        key: QueryKey,
        /// Value before the write, if any.
        previous: Option<CalcStatus>,
        /// New value.
        status: CalcStatus,
    },
    /// Entries under a prefix were marked stale.
    Invalidated {
        /// Invalidated prefix.
        prefix: QueryKey,
    },
    /// An entry was dropped by retention.
    Evicted {
        /// Dropped key.
        key: QueryKey,
    },
    /// An entry was removed explicitly.
    Removed {
        /// Removed key.
        key: QueryKey,
    },
}

impl CacheEvent {
    /// Whether a subscription on `prefix` should see this event.
    #[must_use]
    pub fn concerns(&self, prefix: &QueryKey) -> bool {
        match self {
            Self::Updated { key, .. } | Self::Evicted { key } | Self::Removed { key } => {
                key.starts_with(prefix)
            }
            Self::Invalidated { prefix: invalidated } => invalidated.overlaps(prefix),
        }
    }

    /// Whether this write moved an entry into a terminal state.
    #[must_use]
    pub fn is_terminal_transition(&self) -> bool {
        match self {
            Self::Updated {
                previous, status, ..
            } => status.is_terminal() && !previous.as_ref().is_some_and(CalcStatus::is_terminal),
            _ => false,
        }
    }
}

/// Receiver of cache events.
pub trait CacheObserver: Send + Sync {
    /// Handle one event. Called without any cache lock held.
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event);
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    prefix: QueryKey,
    observer: Arc<dyn CacheObserver>,
}

/// Set of prefix subscriptions.
pub struct ObserverRegistry {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `observer` to events under `prefix`.
    pub fn subscribe(&self, prefix: QueryKey, observer: Arc<dyn CacheObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            prefix,
            observer,
        });
        id
    }

    /// Remove a subscription. Returns `false` if it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `event` to matching observers.
    ///
    /// Observers are collected under the read lock and called after it is
    /// released, so they may subscribe or unsubscribe from the callback.
    pub fn notify(&self, event: &CacheEvent) {
        let targets: Vec<Arc<dyn CacheObserver>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| event.concerns(&s.prefix))
            .map(|s| Arc::clone(&s.observer))
            .collect();
        for observer in targets {
            observer.on_event(event);
        }
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
