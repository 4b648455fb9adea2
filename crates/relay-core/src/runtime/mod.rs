//! Gateway runtime initialization and lifecycle management.
//!
//! The runtime wires a [`Gateway`](crate::protocol::Gateway) from configuration and the
//! backend handles the embedding application supplies, starts its background tasks, and
//! coordinates graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use relay_core::{config::GatewayConfig, protocol::Protocol, runtime::GatewayRuntime};
//!
//! let runtime = GatewayRuntime::builder()
//!     .with_config(GatewayConfig::load()?)
//!     .with_chain_client(chain_client)
//!     .with_signer(signer)
//!     .build()?;
//!
//! let ctx = runtime.gateway().build_request_context(&"eth".into(), &Default::default()).await?;
//! // ... select, dispatch, apply observations ...
//!
//! runtime.wait_for_shutdown().await;
//! ```

pub mod builder;
pub mod lifecycle;

pub use builder::{GatewayRuntimeBuilder, RuntimeError};
pub use lifecycle::GatewayRuntime;
