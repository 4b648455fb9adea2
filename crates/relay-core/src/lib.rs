//! # Relay Core
//!
//! Endpoint lifecycle management for a gateway that forwards client requests to the
//! suppliers of a decentralized relay network.
//!
//! - **[`cache`]**: Periodic application/session refresh and per-service endpoint snapshots,
//!   swapped atomically so readers never observe a partial update.
//!
//! - **[`sanction`]**: Permanent and session-scoped endpoint sanctions derived from request
//!   observations, and filtering of sanctioned endpoints.
//!
//! - **[`chain`]**: The backend node client abstraction and the session rollover monitor.
//!
//! - **[`relay`]**: The per-request context state machine, error classification, the
//!   concurrency limiter and the relay transport.
//!
//! - **[`signing`]**: Relay signing abstraction and the de-duplicating signature cache.
//!
//! - **[`protocol`]**: The [`Protocol`](protocol::Protocol) facade tying the above together.
//!
//! - **[`runtime`]**: Builder and lifecycle owner for a gateway and its background tasks.
//!
//! ## Request Flow
//!
//! ```text
//! build_request_context(service, metadata)
//!       │
//!       ▼
//! cached endpoints ──► sanction filter ──► (empty? fallback endpoints)
//!       │
//!       ▼
//! RequestContext: Built ──select──► Selected ──dispatch──► Completed | Failed
//!       │                                                       │
//!       └──────────────── observations ◄────────────────────────┘
//!                              │
//!                              ▼
//!                     apply_observations ──► sanctions
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod endpoint;
pub mod protocol;
pub mod relay;
pub mod runtime;
pub mod sanction;
pub mod signing;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
