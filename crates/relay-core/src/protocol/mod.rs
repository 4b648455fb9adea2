//! Protocol facade.
//!
//! [`Protocol`] is the narrow surface the request-serving layer talks to: build a request
//! context for a service, feed its observations back, and report health. [`Gateway`] is
//! the implementation over one backend [`ChainClient`], composing the cache manager,
//! sanction store, rollover monitor and the shared relay resources.

use crate::{
    cache::CacheManager,
    chain::{ChainClient, RolloverMonitor},
    config::GatewayConfig,
    endpoint::{fallback_endpoints, Endpoint},
    relay::{ConcurrencyLimiter, RelayResources, RelayTransport, RequestContext, RequestObservations},
    sanction::{SanctionDetails, SanctionStore},
    signing::{RelaySigner, SignatureCache},
    types::{EndpointAddr, ServiceId},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by the protocol facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("no unsanctioned endpoints available for service {0}")]
    NoEndpoints(ServiceId),
}

/// Per-request hints that narrow the candidate endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Only use endpoints from this application's session.
    #[serde(default)]
    pub app_address: Option<String>,
    /// Only use endpoints of this supplier.
    #[serde(default)]
    pub target_supplier: Option<String>,
}

/// Fallback URLs for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceFallback {
    pub service_id: ServiceId,
    /// Route every request to the fallback URLs instead of protocol endpoints.
    #[serde(default)]
    pub send_all_traffic: bool,
    pub fallback_urls: Vec<String>,
}

/// Protocol facade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Name reported by health checks (default: "shannon").
    #[serde(default = "default_protocol_name")]
    pub name: String,

    #[serde(default)]
    pub service_fallbacks: Vec<ServiceFallback>,
}

fn default_protocol_name() -> String {
    "shannon".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { name: default_protocol_name(), service_fallbacks: Vec::new() }
    }
}

/// Liveness reporting for a component.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn is_alive(&self) -> bool;
}

/// Entry point of the endpoint lifecycle layer.
#[async_trait]
pub trait Protocol: HealthCheck {
    /// Builds a request context over the unsanctioned endpoints of `service_id`.
    async fn build_request_context(
        &self,
        service_id: &ServiceId,
        metadata: &RequestMetadata,
    ) -> Result<RequestContext, ProtocolError>;

    /// Feeds the outcome of a request back into endpoint reputation.
    async fn apply_observations(&self, observations: &RequestObservations) -> Result<(), ProtocolError>;

    /// Services the protocol can currently serve.
    fn configured_service_ids(&self) -> Vec<ServiceId>;
}

/// Sanction report for one service, with endpoint counts.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSanctionDetails {
    pub service_id: ServiceId,
    pub total_endpoints: usize,
    pub valid_endpoints: usize,
    #[serde(flatten)]
    pub sanctions: SanctionDetails,
}

#[derive(Debug, Clone)]
struct FallbackSet {
    send_all_traffic: bool,
    endpoints: HashMap<EndpointAddr, Endpoint>,
}

/// [`Protocol`] implementation over one backend network.
pub struct Gateway<C: ChainClient> {
    name: String,
    client: Arc<C>,
    cache: Arc<CacheManager<C>>,
    sanctions: Arc<SanctionStore>,
    rollover: Arc<RolloverMonitor<C>>,
    resources: RelayResources,
    fallbacks: HashMap<ServiceId, FallbackSet>,
}

impl<C: ChainClient> Gateway<C> {
    /// Wires every component from `config`. Background tasks are not started here.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        client: Arc<C>,
        signer: Arc<dyn RelaySigner>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let rollover = Arc::new(RolloverMonitor::new(Arc::clone(&client), config.rollover.clone()));
        let cache = Arc::new(
            CacheManager::new(Arc::clone(&client), config.cache_manager.clone())
                .with_rollover(Arc::clone(&rollover)),
        );

        let resources = RelayResources {
            chain: client.clone(),
            signer,
            transport,
            limiter: Arc::new(ConcurrencyLimiter::new(config.relay.concurrency_limit)),
            signatures: Arc::new(SignatureCache::new(config.signature_cache.clone())),
            config: config.relay.clone(),
        };

        let fallbacks = config
            .protocol
            .service_fallbacks
            .iter()
            .map(|fallback| {
                (
                    fallback.service_id.clone(),
                    FallbackSet {
                        send_all_traffic: fallback.send_all_traffic,
                        endpoints: fallback_endpoints(&fallback.fallback_urls),
                    },
                )
            })
            .collect();

        Self {
            name: config.protocol.name.clone(),
            client,
            cache,
            sanctions: Arc::new(SanctionStore::new(config.sanctions.clone())),
            rollover,
            resources,
            fallbacks,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheManager<C>> {
        &self.cache
    }

    #[must_use]
    pub fn sanctions(&self) -> &Arc<SanctionStore> {
        &self.sanctions
    }

    #[must_use]
    pub fn rollover(&self) -> &Arc<RolloverMonitor<C>> {
        &self.rollover
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.resources.limiter
    }

    #[must_use]
    pub fn signature_cache(&self) -> &Arc<SignatureCache> {
        &self.resources.signatures
    }

    /// Active sanctions for `service_id` together with how many of its endpoints remain
    /// usable.
    pub async fn sanction_details(&self, service_id: &ServiceId) -> ServiceSanctionDetails {
        let endpoints = self.cache.get_service_endpoints(service_id, &RequestMetadata::default());
        let total_endpoints = endpoints.len();
        let valid_endpoints = self.sanctions.filter_sanctioned_endpoints(endpoints).await.len();

        ServiceSanctionDetails {
            service_id: service_id.clone(),
            total_endpoints,
            valid_endpoints,
            sanctions: self.sanctions.sanction_details(Some(service_id)).await,
        }
    }
}

impl<C: ChainClient> HealthCheck for Gateway<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        self.cache.is_healthy() && self.client.is_healthy()
    }
}

#[async_trait]
impl<C: ChainClient> Protocol for Gateway<C> {
    async fn build_request_context(
        &self,
        service_id: &ServiceId,
        metadata: &RequestMetadata,
    ) -> Result<RequestContext, ProtocolError> {
        let fallback = self.fallbacks.get(service_id);
        let fallback_endpoints = fallback.map(|f| f.endpoints.clone()).unwrap_or_default();

        if fallback.is_some_and(|f| f.send_all_traffic && !f.endpoints.is_empty()) {
            debug!(service_id = %service_id, "sending all traffic to fallback endpoints");
            return Ok(RequestContext::new(
                service_id.clone(),
                fallback_endpoints,
                HashMap::new(),
                false,
                self.resources.clone(),
            ));
        }

        let candidates = self.cache.get_service_endpoints(service_id, metadata);
        let total = candidates.len();
        let mut endpoints = self.sanctions.filter_sanctioned_endpoints(candidates).await;

        if endpoints.is_empty() {
            if fallback_endpoints.is_empty() {
                warn!(service_id = %service_id, total, "no unsanctioned endpoints available");
                return Err(ProtocolError::NoEndpoints(service_id.clone()));
            }
            warn!(
                service_id = %service_id,
                total,
                "no unsanctioned protocol endpoints, using fallback endpoints"
            );
            endpoints = fallback_endpoints.clone();
        }

        debug!(
            service_id = %service_id,
            total,
            available = endpoints.len(),
            "built request context"
        );
        Ok(RequestContext::new(
            service_id.clone(),
            endpoints,
            fallback_endpoints,
            self.rollover.is_in_rollover(),
            self.resources.clone(),
        ))
    }

    async fn apply_observations(&self, observations: &RequestObservations) -> Result<(), ProtocolError> {
        if let Some(request_error) = &observations.request_error {
            debug!(
                request_id = %observations.request_id,
                service_id = %observations.service_id,
                kind = ?request_error.kind,
                details = %request_error.details,
                "request failed before reaching an endpoint"
            );
            if observations.endpoint_observations.is_empty() {
                return Ok(());
            }
        }

        self.sanctions.apply_observations(&observations.endpoint_observations).await;
        Ok(())
    }

    fn configured_service_ids(&self) -> Vec<ServiceId> {
        self.cache.service_ids()
    }
}
