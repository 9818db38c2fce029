//! # calcflow-cache
//!
//! The shared calculation status cache: query keys, TTL retention,
//! prefix invalidation and observer subscriptions.

pub mod keys;
pub mod observer;
pub mod retention;
pub mod store;

// Re-exports
pub use keys::QueryKey;
pub use observer::{CacheEvent, CacheObserver, ObserverRegistry, SubscriptionId};
pub use retention::RetentionPolicy;
pub use store::{CacheEntry, CalcCache};
