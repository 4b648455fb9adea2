//! Endpoint sanctions.
//!
//! A sanction excludes an endpoint from selection. Permanent sanctions are keyed by the
//! endpoint alone and are never cleared automatically; session sanctions are keyed by
//! (application, session, endpoint) and expire after a configurable TTL.

mod store;

pub use store::{SanctionDetails, SanctionRecord, SanctionStore};

use crate::{relay::EndpointErrorKind, types::EndpointAddr};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sanction recommended for an endpoint after a relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionType {
    #[default]
    Unspecified,
    DoNotSanction,
    Session,
    Permanent,
    /// A kind this build does not know about. Logged and ignored when applied.
    #[serde(other)]
    Unrecognized,
}

impl SanctionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::DoNotSanction => "do_not_sanction",
            Self::Session => "session",
            Self::Permanent => "permanent",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// A recorded penalty and the context it was created in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanction {
    pub reason: String,
    pub error_kind: Option<EndpointErrorKind>,
    pub created_at: DateTime<Utc>,
    pub supplier: String,
    pub endpoint_url: String,
    pub app_address: String,
    pub session_id: String,
    pub session_service_id: String,
    pub session_start_height: u64,
}

/// Key of a session-scoped sanction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionSanctionKey {
    pub app_address: String,
    pub session_id: String,
    pub endpoint_addr: EndpointAddr,
}

/// Configuration for the sanction store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionConfig {
    /// Lifetime of a session sanction in seconds (default: 3600).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// Interval between sweeps of expired session sanctions in seconds (default: 600).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_session_ttl() -> u64 {
    60 * 60
}

fn default_sweep_interval() -> u64 {
    10 * 60
}

impl Default for SanctionConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl SanctionConfig {
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}
