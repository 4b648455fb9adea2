//! Admission control for outbound relays.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};

/// Default cap on concurrent relay dispatches.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 1000;

/// Counting admission gate for outbound relay calls.
///
/// Bounds how many relays may be in flight at once so that a slow or unreachable backend
/// cannot exhaust local sockets and memory. Slots are released by dropping the
/// [`LimiterPermit`] returned from [`acquire`](Self::acquire), which makes the release
/// happen on every path, including early returns and cancellation.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    capacity: usize,
}

/// RAII permit for one in-flight relay.
///
/// Uses [`OwnedSemaphorePermit`] which owns an `Arc` to the semaphore, making it safe to
/// hold across async boundaries.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::gauge!("relay_limiter_active").set(active as f64);
        tracing::trace!(
            active_requests = active,
            available_permits = self.semaphore.available_permits() + 1,
            "limiter permit released"
        );
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT)
    }
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting at most `capacity` concurrent relays.
    ///
    /// A capacity of zero is raised to one so the gate can never deadlock every caller.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Waits for a free slot until `deadline`.
    ///
    /// Returns `None` if the deadline elapsed first. Callers must treat that as a dispatch
    /// failure rather than proceeding unbounded.
    pub async fn acquire(&self, deadline: Instant) -> Option<LimiterPermit> {
        let permit = tokio::time::timeout_at(deadline, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .ok()?
            .ok()?;

        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!("relay_limiter_active").set(active as f64);
        tracing::trace!(
            active_requests = active,
            available_permits = self.semaphore.available_permits(),
            "limiter permit acquired"
        );

        Some(LimiterPermit {
            _permit: permit,
            semaphore: Arc::clone(&self.semaphore),
            active: Arc::clone(&self.active),
        })
    }

    /// Convenience wrapper around [`acquire`](Self::acquire) with a relative timeout.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Option<LimiterPermit> {
        self.acquire(Instant::now() + timeout).await
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of relays currently holding a permit.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
