//! Integration Tests for the Relay Gateway
//!
//! This crate contains various test modules:
//!
//! - `lifecycle_tests`: endpoint lifecycle through the protocol facade (refresh, filter,
//!   dispatch, sanction, rollover fallback)
//! - `runtime_tests`: runtime background tasks and shutdown coordination
//! - `config_tests`: layered configuration loading with environment overrides
//! - `transport_tests`: dispatch over the HTTP transport against mockito servers
//! - `mock_infrastructure`: reusable chain, signer, transport and selector doubles
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```


#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod runtime_tests;

#[cfg(test)]
mod transport_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
