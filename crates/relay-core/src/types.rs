//! Core domain types shared by every layer of the relay gateway.
//!
//! # Type Categories
//!
//! ## Identifiers
//! - [`ServiceId`]: the service (chain) a relay targets, e.g. `"eth"`
//! - [`EndpointAddr`]: the unique key of an endpoint, `<supplier>-<url>`
//!
//! ## Onchain Snapshots
//! - [`Application`], [`Session`], [`SessionHeader`], [`SupplierEndpoints`]: immutable values
//!   fetched from the chain and replaced wholesale on every refresh
//!
//! ## Relay Payloads
//! - [`RelayPayload`], [`RelayResponse`]: the bytes handed to and returned from a relay
//!
//! Identifiers wrap `Arc<str>` so that snapshots can be cloned into request contexts cheaply.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};

/// Identifier of a service (chain) served through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ServiceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for ServiceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique address of an endpoint: supplier identity joined with its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddr(Arc<str>);

impl EndpointAddr {
    /// Builds the composite `<supplier>-<url>` address.
    #[must_use]
    pub fn new(supplier: &str, url: &str) -> Self {
        Self(format!("{supplier}-{url}").into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointAddr {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl AsRef<str> for EndpointAddr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// RPC flavour exposed by a supplier URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RpcType {
    #[default]
    JsonRpc,
    Rest,
    CometBft,
    Grpc,
    Websocket,
}

impl RpcType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JsonRpc => "json_rpc",
            Self::Rest => "rest",
            Self::CometBft => "comet_bft",
            Self::Grpc => "grpc",
            Self::Websocket => "websocket",
        }
    }

    /// Streaming RPC types are served from the endpoint's streaming URL.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Websocket)
    }
}

/// An onchain application on whose behalf relays are signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub address: String,
    #[serde(default)]
    pub public_key: String,
    /// Services this application is staked for.
    #[serde(default)]
    pub service_ids: Vec<ServiceId>,
}

impl Application {
    #[must_use]
    pub fn serves(&self, service_id: &ServiceId) -> bool {
        self.service_ids.iter().any(|s| s == service_id)
    }
}

/// A single URL advertised by a supplier for one RPC type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierUrl {
    pub rpc_type: RpcType,
    pub url: String,
}

/// All URLs advertised by one supplier inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierEndpoints {
    pub supplier: String,
    pub urls: Vec<SupplierUrl>,
}

/// Height-bounded identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SessionHeader {
    pub session_id: String,
    pub service_id: String,
    pub app_address: String,
    pub start_height: u64,
    pub end_height: u64,
}

/// A time/height-bounded binding of an application to a set of suppliers for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub header: SessionHeader,
    /// The application the session belongs to. Sessions fetched without an application are
    /// not usable for signing.
    #[serde(default)]
    pub application: Option<Application>,
    #[serde(default)]
    pub suppliers: Vec<SupplierEndpoints>,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.header.session_id
    }

    #[must_use]
    pub fn app_address(&self) -> &str {
        &self.header.app_address
    }

    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        ServiceId::from(self.header.service_id.as_str())
    }
}

/// Client payload forwarded through a relay.
#[derive(Debug, Clone)]
pub struct RelayPayload {
    pub data: Bytes,
    /// Optional HTTP path appended to the endpoint URL (REST style services).
    pub path: String,
    pub rpc_type: RpcType,
    /// Deadline budget for the whole dispatch; `None` uses the configured default.
    pub timeout: Option<Duration>,
}

impl RelayPayload {
    #[must_use]
    pub fn json_rpc(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), path: String::new(), rpc_type: RpcType::JsonRpc, timeout: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Validated reply from an endpoint.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub endpoint_addr: EndpointAddr,
    pub bytes: Bytes,
    pub http_status_code: u16,
}
