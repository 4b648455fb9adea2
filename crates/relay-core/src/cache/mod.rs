//! In-memory caches backing endpoint lifecycle management.
//!
//! - [`CacheManager`]: applications, sessions and per-service endpoints held in one
//!   snapshot, refreshed in the background and swapped atomically
//! - [`ExpiringMap`]: concurrent TTL map with a passive sweep, used for session sanctions

pub mod expiring;
pub mod manager;

pub use expiring::ExpiringMap;
pub use manager::{CacheError, CacheManager, CacheRefreshConfig, CacheSnapshot, RefreshStats};
