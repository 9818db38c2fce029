//! The shared status cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, trace};

use calcflow_core::{system_clock, CalcStatus, SharedClock};

use crate::keys::QueryKey;
use crate::observer::{CacheEvent, CacheObserver, ObserverRegistry, SubscriptionId};
use crate::retention::RetentionPolicy;

/// One cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Entry key.
    pub key: QueryKey,
    /// Cached status.
    pub value: CalcStatus,
    /// Time of the last write.
    pub written_at: Instant,
    /// Set by `invalidate` until the next write.
    pub stale: bool,
}

/// Keyed status cache shared by every component.
///
/// Reads and writes go through a `RwLock`; observers run after the lock is
/// released. Expired entries are dropped lazily on read and by
/// [`CalcCache::evict_expired`].
pub struct CalcCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    observers: ObserverRegistry,
    clock: SharedClock,
    retention: RetentionPolicy,
}

impl CalcCache {
    /// Cache on the system clock with default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(system_clock(), RetentionPolicy::default())
    }

    /// Cache with an explicit clock and retention policy.
    #[must_use]
    pub fn with_clock(clock: SharedClock, retention: RetentionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            observers: ObserverRegistry::new(),
            clock,
            retention,
        }
    }

    /// Retention policy in use.
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Current value for `key`, or `None` when missing or expired.
    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<CalcStatus> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Current entry for `key`, or `None` when missing or expired.
    #[must_use]
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            if !self.retention.is_expired(&entry.value, entry.written_at, now) {
                return Some(entry.clone());
            }
        }
        self.evict_if_expired(key, now);
        None
    }

    fn evict_if_expired(&self, key: &QueryKey, now: Instant) {
        let evicted = {
            let mut entries = self.entries.write();
            let expired = entries
                .get(key)
                .is_some_and(|e| self.retention.is_expired(&e.value, e.written_at, now));
            expired && entries.remove(key).is_some()
        };
        if evicted {
            debug!(key = %key, "evicted expired entry");
            self.observers.notify(&CacheEvent::Evicted { key: key.clone() });
        }
    }

    /// Write `status` under `key`.
    ///
    /// Returns `false` without writing when the live entry is terminal.
    /// A terminal entry only goes away by expiry or [`remove`](Self::remove).
    pub fn set(&self, key: QueryKey, status: CalcStatus) -> bool {
        let now = self.clock.now();
        let previous = {
            let mut entries = self.entries.write();
            let previous = entries
                .get(&key)
                .filter(|e| !self.retention.is_expired(&e.value, e.written_at, now))
                .map(|e| e.value.clone());
            if previous.as_ref().is_some_and(CalcStatus::is_terminal) {
                debug!(key = %key, status = status.label(), "refusing to overwrite terminal entry");
                return false;
            }
            entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    value: status.clone(),
                    written_at: now,
                    stale: false,
                },
            );
            previous
        };
        trace!(key = %key, status = status.label(), "cache write");
        self.observers.notify(&CacheEvent::Updated {
            key,
            previous,
            status,
        });
        true
    }

    /// Remove `key`. Returns the removed value.
    pub fn remove(&self, key: &QueryKey) -> Option<CalcStatus> {
        let removed = self.entries.write().remove(key)?;
        self.observers
            .notify(&CacheEvent::Removed { key: key.clone() });
        Some(removed.value)
    }

    /// Mark every entry under `prefix` stale and notify subscribers once.
    ///
    /// Returns how many entries were marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked = {
            let mut entries = self.entries.write();
            let mut marked = 0;
            for entry in entries.values_mut().filter(|e| e.key.starts_with(prefix)) {
                entry.stale = true;
                marked += 1;
            }
            marked
        };
        debug!(prefix = %prefix, marked, "invalidated");
        self.observers.notify(&CacheEvent::Invalidated {
            prefix: prefix.clone(),
        });
        marked
    }

    /// Subscribe to events under `prefix`.
    pub fn subscribe(&self, prefix: QueryKey, observer: Arc<dyn CacheObserver>) -> SubscriptionId {
        self.observers.subscribe(prefix, observer)
    }

    /// Cancel a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let evicted: Vec<QueryKey> = {
            let mut entries = self.entries.write();
            let expired: Vec<QueryKey> = entries
                .values()
                .filter(|e| self.retention.is_expired(&e.value, e.written_at, now))
                .map(|e| e.key.clone())
                .collect();
            for key in &expired {
                entries.remove(key);
            }
            expired
        };
        for key in &evicted {
            self.observers
                .notify(&CacheEvent::Evicted { key: key.clone() });
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted expired entries");
        }
        evicted.len()
    }

    /// Keys under `prefix`, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of stored entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.observers.count()
    }
}

impl Default for CalcCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcflow_core::{CalcError, CalcId, CalculationTarget, ManualClock};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<ManualClock>, CalcCache) {
        let clock = Arc::new(ManualClock::new());
        let cache = CalcCache::with_clock(clock.clone(), RetentionPolicy::default());
        (clock, cache)
    }

    fn report_key(id: &str) -> QueryKey {
        QueryKey::calculation(CalculationTarget::Report, &CalcId::new(id).unwrap())
    }

    fn recorder(cache: &CalcCache, prefix: QueryKey) -> Arc<Mutex<Vec<CacheEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.subscribe(
            prefix,
            Arc::new(move |e: &CacheEvent| sink.lock().push(e.clone())),
        );
        seen
    }

    #[test]
    fn set_then_get() {
        let (_, cache) = setup();
        assert!(cache.set(report_key("1"), CalcStatus::pending(10.0, "x")));
        assert_eq!(cache.get(&report_key("1")), Some(CalcStatus::pending(10.0, "x")));
        assert!(cache.get(&report_key("2")).is_none());
    }

    #[test]
    fn terminal_entries_admit_no_further_writes() {
        let (_, cache) = setup();
        cache.set(report_key("1"), CalcStatus::complete(json!(1)));
        assert!(!cache.set(report_key("1"), CalcStatus::pending(50.0, "x")));
        assert!(!cache.set(report_key("1"), CalcStatus::Initializing));
        assert!(!cache.set(
            report_key("1"),
            CalcStatus::Error(CalcError::new("late", "E", false))
        ));
        assert!(!cache.set(report_key("1"), CalcStatus::complete(json!(2))));
        assert_eq!(cache.get(&report_key("1")), Some(CalcStatus::complete(json!(1))));

        cache.remove(&report_key("1"));
        assert!(cache.set(report_key("1"), CalcStatus::pending(0.0, "again")));
    }

    #[test]
    fn terminal_entry_expires_after_ten_minutes() {
        let (clock, cache) = setup();
        cache.set(report_key("1"), CalcStatus::complete(json!(1)));
        clock.advance(Duration::from_secs(10 * 60));
        assert!(cache.get(&report_key("1")).is_some());
        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&report_key("1")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn pending_entry_expires_after_thirty_minutes() {
        let (clock, cache) = setup();
        cache.set(report_key("1"), CalcStatus::pending(10.0, "x"));
        clock.advance(Duration::from_secs(20 * 60));
        assert!(cache.get(&report_key("1")).is_some());
        clock.advance(Duration::from_secs(11 * 60));
        assert!(cache.get(&report_key("1")).is_none());
    }

    #[test]
    fn expired_terminal_can_be_replaced() {
        let (clock, cache) = setup();
        cache.set(report_key("1"), CalcStatus::complete(json!(1)));
        clock.advance(Duration::from_secs(11 * 60));
        assert!(cache.set(report_key("1"), CalcStatus::pending(0.0, "again")));
    }

    #[test]
    fn evict_expired_sweeps() {
        let (clock, cache) = setup();
        cache.set(report_key("1"), CalcStatus::complete(json!(1)));
        cache.set(report_key("2"), CalcStatus::pending(1.0, "x"));
        let events = recorder(&cache, QueryKey::calculations_all());
        clock.advance(Duration::from_secs(15 * 60));
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(matches!(events.lock()[0], CacheEvent::Evicted { .. }));
    }

    #[test]
    fn invalidate_marks_stale_and_notifies_once() {
        let (_, cache) = setup();
        cache.set(report_key("1"), CalcStatus::pending(1.0, "x"));
        cache.set(report_key("2"), CalcStatus::pending(1.0, "x"));
        let events = recorder(&cache, QueryKey::calculations_all());
        assert_eq!(cache.invalidate(&QueryKey::calculations_all()), 2);
        assert!(cache.entry(&report_key("1")).unwrap().stale);
        assert_eq!(events.lock().len(), 1);

        cache.set(report_key("1"), CalcStatus::pending(2.0, "x"));
        assert!(!cache.entry(&report_key("1")).unwrap().stale);
    }

    #[test]
    fn invalidate_without_entries_still_notifies() {
        let (_, cache) = setup();
        let events = recorder(&cache, QueryKey::reports_all());
        assert_eq!(cache.invalidate(&QueryKey::reports_all()), 0);
        assert_eq!(
            *events.lock(),
            vec![CacheEvent::Invalidated {
                prefix: QueryKey::reports_all()
            }]
        );
    }

    #[test]
    fn update_event_carries_previous_value() {
        let (_, cache) = setup();
        let events = recorder(&cache, report_key("1"));
        cache.set(report_key("1"), CalcStatus::pending(1.0, "x"));
        cache.set(report_key("1"), CalcStatus::complete(json!(2)));
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal_transition());
    }

    #[test]
    fn observer_may_reenter_cache() {
        let (_, cache) = setup();
        let cache = Arc::new(cache);
        let inner = Arc::clone(&cache);
        cache.subscribe(
            report_key("1"),
            Arc::new(move |e: &CacheEvent| {
                if e.is_terminal_transition() {
                    inner.invalidate(&QueryKey::reports_all());
                }
            }),
        );
        let events = recorder(&cache, QueryKey::reports_all());
        cache.set(report_key("1"), CalcStatus::complete(json!(1)));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn remove_notifies() {
        let (_, cache) = setup();
        cache.set(report_key("1"), CalcStatus::pending(0.0, "x"));
        let events = recorder(&cache, report_key("1"));
        assert!(cache.remove(&report_key("1")).is_some());
        assert!(cache.remove(&report_key("1")).is_none());
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn keys_with_prefix_sorted() {
        let (_, cache) = setup();
        cache.set(report_key("b"), CalcStatus::Initializing);
        cache.set(report_key("a"), CalcStatus::Initializing);
        assert_eq!(
            cache.keys_with_prefix(&QueryKey::calculations_all()),
            vec![report_key("a"), report_key("b")]
        );
    }
}
