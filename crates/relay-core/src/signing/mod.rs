//! Relay signing.
//!
//! The signature scheme itself belongs to the backend network and sits behind the
//! [`RelaySigner`] trait. This module defines the request/response envelope and the
//! [`SignatureCache`] that memoizes signatures per (session, supplier, app, payload).

pub mod cache;

pub use cache::{SignatureCache, SignatureCacheConfig, SignatureCacheStats, SignatureKey};

use crate::types::{Application, SessionHeader};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Errors produced while signing a relay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SignerError {
    #[error("relay request is missing a session header")]
    MissingSessionHeader,

    #[error("relay request session header is invalid: {0}")]
    InvalidSessionHeader(String),

    #[error("signing key unavailable for {0}")]
    KeyUnavailable(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("relay encoding failed: {0}")]
    Encoding(String),
}

/// An unsigned relay addressed to one supplier within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub header: SessionHeader,
    pub supplier: String,
    pub payload: Bytes,
}

impl RelayRequest {
    /// Checks that the request carries a usable session header.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::MissingSessionHeader`] when the header is empty and
    /// [`SignerError::InvalidSessionHeader`] when its heights are inconsistent.
    pub fn validate(&self) -> Result<(), SignerError> {
        if self.header.session_id.is_empty() || self.header.app_address.is_empty() {
            return Err(SignerError::MissingSessionHeader);
        }
        if self.header.end_height < self.header.start_height {
            return Err(SignerError::InvalidSessionHeader(format!(
                "end height {} is below start height {}",
                self.header.end_height, self.header.start_height
            )));
        }
        Ok(())
    }
}

/// A relay request together with its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRelay {
    pub request: RelayRequest,
    pub signature: Bytes,
}

#[derive(Serialize)]
struct WireRelay<'a> {
    session_id: &'a str,
    service_id: &'a str,
    app_address: &'a str,
    session_start_height: u64,
    session_end_height: u64,
    supplier: &'a str,
    payload: String,
    signature: String,
}

impl SignedRelay {
    /// Returns true if this signature was produced for the given metadata.
    #[must_use]
    pub fn matches(&self, session_id: &str, supplier: &str, app_address: &str) -> bool {
        self.request.header.session_id == session_id &&
            self.request.supplier == supplier &&
            self.request.header.app_address == app_address
    }

    /// Serializes the signed relay into the body POSTed to the supplier.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Encoding`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes, SignerError> {
        let header = &self.request.header;
        let wire = WireRelay {
            session_id: &header.session_id,
            service_id: &header.service_id,
            app_address: &header.app_address,
            session_start_height: header.start_height,
            session_end_height: header.end_height,
            supplier: &self.request.supplier,
            payload: hex::encode(&self.request.payload),
            signature: hex::encode(&self.signature),
        };
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| SignerError::Encoding(e.to_string()))
    }
}

/// Produces relay signatures on behalf of applications.
#[async_trait]
pub trait RelaySigner: Send + Sync + 'static {
    async fn sign(&self, request: RelayRequest, app: &Application) -> Result<SignedRelay, SignerError>;
}
