//! Endpoint registry: derives relay candidates from session snapshots.
//!
//! Endpoints are value objects rebuilt from every session snapshot and compared by their
//! [`EndpointAddr`]. A supplier may advertise several URLs inside a session; the
//! streaming (websocket) URL is kept alongside the primary URL on a single endpoint.
//!
//! Fallback endpoints live outside the supplier set and are configured per service. They
//! are used for degraded-mode serving and never carry a session.

use crate::types::{EndpointAddr, RpcType, Session, SessionHeader};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};
use tracing::{debug, warn};

const FALLBACK_SUPPLIER: &str = "fallback";

/// A remote node able to serve relays.
#[derive(Debug, Clone)]
pub struct Endpoint {
    addr: EndpointAddr,
    supplier: Arc<str>,
    url: String,
    streaming_url: Option<String>,
    session: Option<Arc<Session>>,
    rpc_urls: HashMap<RpcType, String>,
    fallback: bool,
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl Endpoint {
    /// Builds a protocol endpoint belonging to `session`.
    #[must_use]
    pub fn new(
        supplier: &str,
        url: impl Into<String>,
        streaming_url: Option<String>,
        session: Arc<Session>,
    ) -> Self {
        let url = url.into();
        Self {
            addr: EndpointAddr::new(supplier, &url),
            supplier: supplier.into(),
            url,
            streaming_url,
            session: Some(session),
            rpc_urls: HashMap::new(),
            fallback: false,
        }
    }

    /// Builds a fallback endpoint. `rpc_urls` overrides `default_url` per RPC type.
    #[must_use]
    pub fn fallback(default_url: impl Into<String>, rpc_urls: HashMap<RpcType, String>) -> Self {
        let url = default_url.into();
        Self {
            addr: EndpointAddr::new(FALLBACK_SUPPLIER, &url),
            supplier: FALLBACK_SUPPLIER.into(),
            streaming_url: rpc_urls.get(&RpcType::Websocket).cloned(),
            url,
            session: None,
            rpc_urls,
            fallback: true,
        }
    }

    #[must_use]
    pub fn addr(&self) -> &EndpointAddr {
        &self.addr
    }

    #[must_use]
    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn streaming_url(&self) -> Option<&str> {
        self.streaming_url.as_deref()
    }

    /// URL to use for a given RPC type.
    #[must_use]
    pub fn url_for(&self, rpc_type: RpcType) -> &str {
        if rpc_type.is_streaming() {
            if let Some(url) = self.streaming_url.as_deref() {
                return url;
            }
        }
        self.rpc_urls.get(&rpc_type).map_or(self.url.as_str(), String::as_str)
    }

    /// The session this endpoint was derived from; `None` for fallback endpoints.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn session_header(&self) -> Option<&SessionHeader> {
        self.session.as_deref().map(|s| &s.header)
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// Derives the unique endpoints of a session.
///
/// When `allowed_supplier` is set, endpoints of every other supplier are dropped.
/// Suppliers that advertise only a streaming URL are skipped.
#[must_use]
pub fn endpoints_from_session(
    session: &Arc<Session>,
    allowed_supplier: Option<&str>,
) -> HashMap<EndpointAddr, Endpoint> {
    let mut endpoints = HashMap::with_capacity(session.suppliers.len());

    for supplier_endpoints in &session.suppliers {
        let supplier = supplier_endpoints.supplier.as_str();
        if allowed_supplier.is_some_and(|allowed| allowed != supplier) {
            continue;
        }

        let mut url = None;
        let mut streaming_url = None;
        for supplier_url in &supplier_endpoints.urls {
            if supplier_url.rpc_type.is_streaming() {
                streaming_url = Some(supplier_url.url.clone());
            } else {
                url = Some(supplier_url.url.clone());
            }
        }

        let Some(url) = url else {
            warn!(
                supplier = %supplier,
                session_id = %session.header.session_id,
                "supplier advertises no relay URL, skipping"
            );
            continue;
        };

        let endpoint = Endpoint::new(supplier, url, streaming_url, Arc::clone(session));
        endpoints.insert(endpoint.addr().clone(), endpoint);
    }

    debug!(
        session_id = %session.header.session_id,
        service_id = %session.header.service_id,
        endpoint_count = endpoints.len(),
        "derived endpoints from session"
    );
    endpoints
}

/// Merges `endpoints` into `target`, keeping the first endpoint seen for every address.
///
/// Returns the number of endpoints that were already present.
pub fn merge_first_seen(
    target: &mut HashMap<EndpointAddr, Endpoint>,
    endpoints: impl IntoIterator<Item = Endpoint>,
) -> usize {
    let mut duplicates = 0;
    for endpoint in endpoints {
        match target.entry(endpoint.addr().clone()) {
            Entry::Occupied(_) => duplicates += 1,
            Entry::Vacant(slot) => {
                slot.insert(endpoint);
            }
        }
    }
    duplicates
}

/// Builds the fallback endpoints configured for a service, keyed by address.
#[must_use]
pub fn fallback_endpoints(urls: &[String]) -> HashMap<EndpointAddr, Endpoint> {
    urls.iter()
        .map(|url| {
            let endpoint = Endpoint::fallback(url.clone(), HashMap::new());
            (endpoint.addr().clone(), endpoint)
        })
        .collect()
}
