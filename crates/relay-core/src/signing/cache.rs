//! Signature cache with per-key computation coalescing.
//!
//! Signing is the most CPU-heavy step of a relay. Identical relays (same session, supplier,
//! app and payload) produce identical signatures, so the cache stores them for a fixed TTL
//! and guarantees that concurrent requests for one key trigger at most one computation.
//!
//! # Coalescing
//!
//! ```text
//! get_or_compute(key)
//!     │
//!     ├── stored entry? ──────────────► hit
//!     │
//!     ├── join inflight cell for key (created if absent)
//!     │       │
//!     │       ├── first caller computes, stores, fills the cell
//!     │       └── other callers wait on the cell and receive the same value
//!     │
//!     └── InflightGuard drop removes the cell once it holds a value or no other
//!         caller still shares it
//! ```
//!
//! A failed computation leaves the cell empty and in place while others wait on it; the
//! next waiter retries and later arrivals join that retry, so computations stay one at a
//! time per key.

use super::{RelayRequest, SignedRelay, SignerError};
use crate::types::Application;
use dashmap::DashMap;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::OnceCell, task::JoinHandle};
use tracing::{debug, info, warn};

/// Configuration for the signature cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCacheConfig {
    /// When disabled every call computes the signature directly (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lifetime of a stored signature in seconds (default: 900).
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Interval of the background maintenance pass in seconds (default: 60).
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Upper bound on stored signatures (default: 100000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    15 * 60
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

fn default_max_entries() -> u64 {
    100_000
}

impl Default for SignatureCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_seconds: default_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

/// SHA-256 digest identifying one signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureKey([u8; 32]);

impl SignatureKey {
    /// Hashes the signature inputs. Each field is length-prefixed so that adjacent
    /// fields cannot shift bytes into one another.
    #[must_use]
    pub fn new(session_id: &str, supplier: &str, app_address: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        for field in [session_id.as_bytes(), supplier.as_bytes(), app_address.as_bytes(), payload] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn for_request(request: &RelayRequest, app: &Application) -> Self {
        Self::new(&request.header.session_id, &request.supplier, &app.address, &request.payload)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureKey({})", &self.to_hex()[..12])
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignatureCacheStats {
    pub enabled: bool,
    pub entries: u64,
    pub inflight: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

type InflightCell = Arc<OnceCell<Arc<SignedRelay>>>;

/// Removes the inflight cell for a key when a caller finishes, provided the map still
/// holds the same cell and the cell is either filled or held by nobody else.
///
/// The check runs under the map's shard lock, the same lock new callers clone the cell
/// under, so a caller cannot join a cell that is being removed.
struct InflightGuard<'a> {
    inflight: &'a DashMap<SignatureKey, InflightCell>,
    key: SignatureKey,
    cell: InflightCell,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.remove_if(&self.key, |_, cell| {
            // One reference in the map, one in this guard.
            Arc::ptr_eq(cell, &self.cell) && (cell.initialized() || Arc::strong_count(cell) == 2)
        });
    }
}

/// Memoizes relay signatures by [`SignatureKey`].
pub struct SignatureCache {
    config: SignatureCacheConfig,
    entries: Cache<SignatureKey, Arc<SignedRelay>>,
    inflight: DashMap<SignatureKey, InflightCell>,
    hits: AtomicU64,
    misses: AtomicU64,
    started: AtomicBool,
}

impl SignatureCache {
    #[must_use]
    pub fn new(config: SignatureCacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        Self {
            config,
            entries,
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// A cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(SignatureCacheConfig { enabled: false, ..SignatureCacheConfig::default() })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn config(&self) -> &SignatureCacheConfig {
        &self.config
    }

    /// Returns the cached signature for `request`, computing it with `compute` on a miss.
    ///
    /// Concurrent callers with the same key share a single invocation of `compute`.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute` returns on failure. Failures are never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        request: RelayRequest,
        app: &Application,
        compute: F,
    ) -> Result<Arc<SignedRelay>, SignerError>
    where
        F: FnOnce(RelayRequest) -> Fut,
        Fut: Future<Output = Result<SignedRelay, SignerError>>,
    {
        if !self.config.enabled {
            return compute(request).await.map(Arc::new);
        }

        let key = SignatureKey::for_request(&request, app);

        if let Some(signed) = self.lookup(&key, &request, app).await {
            self.record_hit();
            return Ok(signed);
        }

        let cell = self.inflight.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone();
        let guard = InflightGuard { inflight: &self.inflight, key, cell };

        let computed = AtomicBool::new(false);
        let computed_ref = &computed;
        let entries = &self.entries;

        let signed = guard
            .cell
            .get_or_try_init(|| async move {
                // Another caller may have stored the value between our lookup and joining.
                if let Some(signed) = entries.get(&key).await {
                    return Ok(signed);
                }
                let signed = Arc::new(compute(request).await?);
                entries.insert(key, signed.clone()).await;
                computed_ref.store(true, Ordering::Relaxed);
                Ok(signed)
            })
            .await?
            .clone();

        if computed.load(Ordering::Relaxed) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("relay_signature_cache_misses_total").increment(1);
            debug!(key = ?key, "signature computed and cached");
        } else {
            self.record_hit();
        }

        Ok(signed)
    }

    async fn lookup(
        &self,
        key: &SignatureKey,
        request: &RelayRequest,
        app: &Application,
    ) -> Option<Arc<SignedRelay>> {
        let signed = self.entries.get(key).await?;
        if signed.matches(&request.header.session_id, &request.supplier, &app.address) {
            return Some(signed);
        }

        warn!(
            key = ?key,
            session_id = %request.header.session_id,
            supplier = %request.supplier,
            "cached signature metadata mismatch, discarding entry"
        );
        self.entries.invalidate(key).await;
        None
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_signature_cache_hits_total").increment(1);
    }

    #[must_use]
    pub fn stats(&self) -> SignatureCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        SignatureCacheStats {
            enabled: self.config.enabled,
            entries: self.entries.entry_count(),
            inflight: self.inflight.len(),
            hits,
            misses,
            hit_rate,
        }
    }

    /// Drops every stored signature and resets the counters.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!("signature cache cleared");
    }

    /// Runs pending expirations and drops inflight cells that already hold a value.
    pub async fn sweep(&self) {
        self.entries.run_pending_tasks().await;
        self.inflight.retain(|_, cell| !cell.initialized());
        metrics::gauge!("relay_signature_cache_entries").set(self.entries.entry_count() as f64);
    }

    /// Starts the periodic maintenance task.
    ///
    /// Returns `None` if the cache is disabled or the task was already started.
    pub fn start_sweeper(
        self: &Arc<Self>,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }
        if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("signature cache sweeper already started");
            return None;
        }

        let cache = Arc::clone(self);
        let period = Duration::from_secs(cache.config.sweep_interval_seconds.max(1));

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => cache.sweep().await,
                    _ = shutdown_rx.recv() => {
                        info!("signature cache sweeper shutting down");
                        break;
                    }
                }
            }
        }))
    }
}
