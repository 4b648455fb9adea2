//! Per-request relay handling.
//!
//! A [`RequestContext`] carries one client request from endpoint selection through
//! signing, dispatch and validation, recording an observation for every endpoint it
//! contacts. The limiter, transport, error taxonomy and observation types it relies on
//! live in the submodules.

pub mod context;
pub mod errors;
pub mod limiter;
pub mod observation;
pub mod transport;

pub use context::{
    ContextState, EndpointSelector, RelayResources, RequestContext, RoundRobinSelector,
};
pub use errors::{EndpointErrorKind, ErrorClassification, RelayError};
pub use limiter::{ConcurrencyLimiter, LimiterPermit, DEFAULT_CONCURRENCY_LIMIT};
pub use observation::{
    EndpointObservation, RequestError, RequestErrorKind, RequestObservations,
};
pub use transport::{HttpRelayTransport, RelayTransport, TransportConfig, TransportError};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum concurrent relay dispatches (default: 1000).
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Deadline applied when the caller supplies none, in milliseconds (default: 10000).
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Wait on a protocol endpoint during session rollover before switching to a fallback
    /// endpoint, in milliseconds (default: 1000).
    #[serde(default = "default_rollover_fallback_wait_ms")]
    pub rollover_fallback_wait_ms: u64,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_rollover_fallback_wait_ms() -> u64 {
    1_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            default_timeout_ms: default_timeout_ms(),
            rollover_fallback_wait_ms: default_rollover_fallback_wait_ms(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn rollover_fallback_wait(&self) -> Duration {
        Duration::from_millis(self.rollover_fallback_wait_ms)
    }
}
