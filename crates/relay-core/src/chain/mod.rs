//! Remote chain access and chain-derived state.
//!
//! The [`ChainClient`] trait is the only seam between the gateway and the backend network.
//! Every backend (one per supported network) provides an implementation; all caching,
//! sanctioning and relay logic is written once, generic over this trait.
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │   ChainClient    │  (one impl per backend network)
//!                 └────────┬─────────┘
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!   ┌─────────────┐ ┌──────────────┐ ┌──────────────┐
//!   │CacheManager │ │RolloverMonitor│ │RequestContext│
//!   │ apps,       │ │ block height  │ │ reply        │
//!   │ sessions    │ │ polling       │ │ validation   │
//!   └─────────────┘ └──────────────┘ └──────────────┘
//! ```

pub mod rollover;

pub use rollover::{RolloverConfig, RolloverMonitor, RolloverStatus};

use crate::types::{Application, ServiceId, Session};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors returned by a [`ChainClient`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ChainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("chain request timed out")]
    Timeout,

    #[error("chain node unavailable: {0}")]
    Unavailable(String),

    #[error("chain rpc error: {0}")]
    Rpc(String),

    #[error("relay response validation failed: {0}")]
    InvalidRelayResponse(String),
}

impl ChainError {
    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// A relay reply that passed validation by the chain client.
#[derive(Debug, Clone)]
pub struct ValidatedRelay {
    /// The backend service payload carried by the relay reply.
    pub payload: Bytes,
    /// HTTP status code reported by the backend service behind the endpoint.
    pub http_status_code: u16,
}

/// Thin client to the backend network.
///
/// Implementations return raw onchain data; they perform no caching of their own.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Fetches every application the gateway is permitted to relay for.
    async fn fetch_apps(&self) -> Result<Vec<Application>, ChainError>;

    /// Fetches one application by address.
    async fn get_app(&self, address: &str) -> Result<Application, ChainError>;

    /// Fetches the current session for an application on a service.
    async fn get_session(
        &self,
        service_id: &ServiceId,
        app_address: &str,
    ) -> Result<Session, ChainError>;

    /// Returns the latest block height known to the node.
    async fn get_current_block_height(&self) -> Result<u64, ChainError>;

    /// Verifies a raw relay reply signed by `supplier` and extracts its payload.
    async fn validate_relay_response(
        &self,
        supplier: &str,
        response: &[u8],
    ) -> Result<ValidatedRelay, ChainError>;

    /// Returns the public key of an onchain account.
    async fn get_account_public_key(&self, address: &str) -> Result<String, ChainError>;

    /// Reports whether the client can currently reach the node.
    fn is_healthy(&self) -> bool {
        true
    }
}
