//! Mock Infrastructure for Testing the Relay Gateway
//!
//! Reusable backends for driving a [`Gateway`](relay_core::protocol::Gateway) without a
//! real network.
//!
//! ## Components
//!
//! - `MockChain`: in-memory [`ChainClient`](relay_core::chain::ChainClient) with
//!   switchable failures and a settable block height
//! - `MockSigner`: deterministic signer that counts its invocations
//! - `MockTransport`: scripted transport with per-URL delays and failures
//! - `PrefixSelector`: deterministic endpoint selector
//! - Test helpers for common sessions and applications
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{eth_scenario, MockSigner, MockTransport};
//!
//! let chain = eth_scenario();
//! let gateway = Gateway::new(&config, chain, Arc::new(MockSigner::new()), Arc::new(MockTransport::new()));
//! ```

pub mod chain_mock;
pub mod relay_mock;

pub use chain_mock::MockChain;
pub use relay_mock::{MockSigner, MockTransport, PrefixSelector};
pub use test_helpers::*;
