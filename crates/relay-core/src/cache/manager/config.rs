//! Configuration and error types for the cache manager.

use crate::{chain::ChainError, types::ServiceId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the cache manager.
///
/// Refresh errors are logged and never reach request handling; the previous snapshot keeps
/// serving.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The application list could not be fetched.
    #[error("application fetch failed: {0}")]
    AppFetch(#[source] ChainError),

    /// The chain returned no applications; the refresh was skipped.
    #[error("no applications returned by the chain")]
    NoApplications,

    /// Every session fetch of a refresh cycle failed; the refresh was skipped.
    #[error("all {attempted} session fetches failed")]
    NoSessions { attempted: usize },

    /// A chain call exceeded the configured fetch timeout.
    #[error("chain call timed out after {0:?}")]
    Timeout(Duration),

    /// An application missing from the snapshot could not be fetched from the chain.
    #[error("application lookup failed for {address}: {source}")]
    AppLookup {
        address: String,
        #[source]
        source: ChainError,
    },

    /// An account public key could not be fetched from the chain.
    #[error("public key lookup failed for account {address}: {source}")]
    AccountLookup {
        address: String,
        #[source]
        source: ChainError,
    },

    /// A session lookup that missed the snapshot also failed on the chain.
    #[error("session lookup failed for app {app_address} on service {service_id}: {source}")]
    SessionLookup {
        service_id: ServiceId,
        app_address: String,
        #[source]
        source: ChainError,
    },
}

/// Configuration for the periodic session refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRefreshConfig {
    /// Seconds between refresh cycles (default: 60).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Concurrent session fetches per refresh cycle (default: 100).
    #[serde(default = "default_session_workers")]
    pub session_workers: usize,

    /// Timeout for each chain call made during a refresh, in seconds (default: 30).
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_session_workers() -> usize {
    100
}

fn default_fetch_timeout() -> u64 {
    30
}

impl Default for CacheRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            session_workers: default_session_workers(),
            fetch_timeout_seconds: default_fetch_timeout(),
        }
    }
}

impl CacheRefreshConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Worker count, never zero.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.session_workers.max(1)
    }
}
