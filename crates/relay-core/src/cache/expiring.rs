//! Self-expiring concurrent map.
//!
//! Entries carry an absolute expiry computed at insertion. Reads never return an expired
//! entry; [`ExpiringMap::sweep`] evicts entries that are never read again. The map does its
//! own sharded locking through `DashMap`, so callers never wrap it in another lock.
//!
//! Time is read from `tokio::time::Instant`, which lets tests drive expiry with a paused
//! clock.

use dashmap::DashMap;
use std::{hash::Hash, time::Duration};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Expiring<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Expiring<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent map whose entries disappear a fixed time after insertion.
#[derive(Debug)]
pub struct ExpiringMap<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Expiring<V>>,
    ttl: Duration,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or replaces `key`, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key, Expiring { value, expires_at });
    }

    /// Returns the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Evicts every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Snapshot of all live entries.
    #[must_use]
    pub fn live_entries(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
