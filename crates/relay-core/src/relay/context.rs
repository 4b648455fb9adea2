//! Relay request context state machine.
//!
//! ```text
//! Built ──select_endpoint──► Selected ──dispatch──► Dispatched ──┬──► Completed
//!   │                                                           └──► Failed(kind)
//!   └── empty candidates / selector error ──────────────────────────► Failed(Internal)
//! ```
//!
//! Dispatching a protocol endpoint signs the relay through the signature cache, takes a
//! limiter permit, POSTs the signed relay and validates the reply through the chain
//! client, all under one deadline. Fallback endpoints receive the raw payload unsigned.
//!
//! While the service is in session rollover and fallback endpoints exist, the protocol
//! endpoint only gets a shortened wait; on failure the request is retried once against a
//! fallback endpoint. The protocol failure is still observed.

use super::{
    errors::{EndpointErrorKind, RelayError},
    limiter::ConcurrencyLimiter,
    observation::{EndpointObservation, RequestError, RequestErrorKind, RequestObservations},
    transport::RelayTransport,
    RelayConfig,
};
use crate::{
    chain::ChainClient,
    endpoint::Endpoint,
    signing::{RelayRequest, RelaySigner, SignatureCache},
    types::{EndpointAddr, RelayPayload, RelayResponse, ServiceId},
};
use chrono::Utc;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Picks one endpoint out of the sanction-filtered candidates.
pub trait EndpointSelector: Send + Sync {
    /// `candidates` is sorted and never empty.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when no candidate is acceptable.
    fn select(&self, service_id: &ServiceId, candidates: &[EndpointAddr]) -> Result<EndpointAddr, String>;
}

/// Rotates through the candidates in address order.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: AtomicUsize,
}

impl RoundRobinSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select(&self, _service_id: &ServiceId, candidates: &[EndpointAddr]) -> Result<EndpointAddr, String> {
        if candidates.is_empty() {
            return Err("no candidates".to_string());
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates[index].clone())
    }
}

/// Shared collaborators handed to every request context.
#[derive(Clone)]
pub struct RelayResources {
    pub chain: Arc<dyn ChainClient>,
    pub signer: Arc<dyn RelaySigner>,
    pub transport: Arc<dyn RelayTransport>,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub signatures: Arc<SignatureCache>,
    pub config: RelayConfig,
}

/// Lifecycle state of a [`RequestContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Built,
    Selected,
    Dispatched,
    Completed,
    Failed(EndpointErrorKind),
}

impl ContextState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Carries one client request through selection, dispatch and validation.
pub struct RequestContext {
    request_id: Uuid,
    service_id: ServiceId,
    endpoints: HashMap<EndpointAddr, Endpoint>,
    fallback_endpoints: HashMap<EndpointAddr, Endpoint>,
    in_rollover: bool,
    resources: RelayResources,
    state: ContextState,
    selected: Option<Endpoint>,
    observations: RequestObservations,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("service_id", &self.service_id)
            .field("state", &self.state)
            .field("in_rollover", &self.in_rollover)
            .field("endpoints", &self.endpoints.len())
            .field("selected", &self.selected.as_ref().map(Endpoint::addr))
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Creates a context over `endpoints`, which must already be sanction-filtered.
    ///
    /// `fallback_endpoints` are only consulted for rollover retries.
    #[must_use]
    pub fn new(
        service_id: ServiceId,
        endpoints: HashMap<EndpointAddr, Endpoint>,
        fallback_endpoints: HashMap<EndpointAddr, Endpoint>,
        in_rollover: bool,
        resources: RelayResources,
    ) -> Self {
        let request_id = Uuid::new_v4();
        Self {
            observations: RequestObservations::new(request_id, service_id.clone()),
            request_id,
            service_id,
            endpoints,
            fallback_endpoints,
            in_rollover,
            resources,
            state: ContextState::Built,
            selected: None,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[must_use]
    pub fn is_in_rollover(&self) -> bool {
        self.in_rollover
    }

    #[must_use]
    pub fn selected_endpoint(&self) -> Option<&Endpoint> {
        self.selected.as_ref()
    }

    /// Candidate addresses in sorted order.
    #[must_use]
    pub fn available_endpoints(&self) -> Vec<EndpointAddr> {
        let mut addrs: Vec<EndpointAddr> = self.endpoints.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    #[must_use]
    pub fn observations(&self) -> &RequestObservations {
        &self.observations
    }

    #[must_use]
    pub fn into_observations(self) -> RequestObservations {
        self.observations
    }

    /// Chooses the endpoint to dispatch to.
    ///
    /// # Errors
    ///
    /// Fails when there are no candidates, when the selector gives up, or when it returns
    /// an address that is not a candidate. Each failure records a request-level error and
    /// moves the context to `Failed(Internal)`.
    pub fn select_endpoint(&mut self, selector: &dyn EndpointSelector) -> Result<&Endpoint, RelayError> {
        if !matches!(self.state, ContextState::Built | ContextState::Selected) {
            return Err(RelayError::AlreadyDispatched(self.service_id.clone()));
        }

        let candidates = self.available_endpoints();
        if candidates.is_empty() {
            let err = RelayError::NoEndpoints(self.service_id.clone());
            self.fail_request(RequestErrorKind::NoEndpoints, &err);
            return Err(err);
        }

        let chosen = match selector.select(&self.service_id, &candidates) {
            Ok(addr) => addr,
            Err(reason) => {
                let err = RelayError::SelectionFailed { service_id: self.service_id.clone(), reason };
                self.fail_request(RequestErrorKind::EndpointSelection, &err);
                return Err(err);
            }
        };

        let Some(endpoint) = self.endpoints.get(&chosen).cloned() else {
            error!(
                service_id = %self.service_id,
                endpoint = %chosen,
                "selector returned an endpoint outside the candidate set"
            );
            let err = RelayError::EndpointNotFound { endpoint: chosen, service_id: self.service_id.clone() };
            self.fail_request(RequestErrorKind::EndpointSelection, &err);
            return Err(err);
        };

        debug!(
            service_id = %self.service_id,
            endpoint = %endpoint.addr(),
            fallback = endpoint.is_fallback(),
            "endpoint selected"
        );
        self.state = ContextState::Selected;
        Ok(&*self.selected.insert(endpoint))
    }

    fn fail_request(&mut self, kind: RequestErrorKind, err: &RelayError) {
        self.observations.request_error = Some(RequestError { kind, details: err.to_string() });
        self.state = ContextState::Failed(EndpointErrorKind::Internal);
    }

    /// Sends `payload` to the selected endpoint and validates the reply.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoEndpointSelected`] if no endpoint was selected and
    /// [`RelayError::AlreadyDispatched`] on a second call. Any dispatch failure is
    /// classified, recorded as an observation and returned.
    pub async fn dispatch(&mut self, payload: RelayPayload) -> Result<RelayResponse, RelayError> {
        if self.state != ContextState::Selected {
            if self.state == ContextState::Built {
                return Err(RelayError::NoEndpointSelected(self.service_id.clone()));
            }
            return Err(RelayError::AlreadyDispatched(self.service_id.clone()));
        }
        let Some(endpoint) = self.selected.clone() else {
            return Err(RelayError::NoEndpointSelected(self.service_id.clone()));
        };

        self.state = ContextState::Dispatched;
        let timeout = payload.timeout.unwrap_or_else(|| self.resources.config.default_timeout());
        let deadline = Instant::now() + timeout;

        let result = if endpoint.is_fallback() {
            self.attempt(&endpoint, &payload, deadline).await
        } else if let Some(fallback) = self.rollover_fallback() {
            let wait = timeout.min(self.resources.config.rollover_fallback_wait());
            match self.attempt(&endpoint, &payload, Instant::now() + wait).await {
                Ok(response) => Ok(response),
                Err(err) => {
                    warn!(
                        service_id = %self.service_id,
                        endpoint = %endpoint.addr(),
                        fallback = %fallback.addr(),
                        error = %err,
                        "protocol relay failed during session rollover, using fallback endpoint"
                    );
                    self.attempt(&fallback, &payload, deadline).await
                }
            }
        } else {
            self.attempt(&endpoint, &payload, deadline).await
        };

        let outcome = match &result {
            Ok(_) => {
                self.state = ContextState::Completed;
                "success"
            }
            Err(err) => {
                self.state = ContextState::Failed(err.classify().kind);
                "failure"
            }
        };
        metrics::counter!(
            "relay_requests_total",
            "service" => self.service_id.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    fn rollover_fallback(&self) -> Option<Endpoint> {
        if !self.in_rollover {
            return None;
        }
        self.fallback_endpoints.iter().min_by(|a, b| a.0.cmp(b.0)).map(|(_, endpoint)| endpoint.clone())
    }

    /// One relay attempt against one endpoint, recorded as an observation.
    async fn attempt(
        &mut self,
        endpoint: &Endpoint,
        payload: &RelayPayload,
        deadline: Instant,
    ) -> Result<RelayResponse, RelayError> {
        let query_timestamp = Utc::now();
        let url = target_url(endpoint, payload);

        let result = if endpoint.is_fallback() {
            self.send_fallback(endpoint, &url, payload, deadline).await
        } else {
            self.send_protocol(endpoint, &url, payload, deadline).await
        };

        let observation = match &result {
            Ok(response) => EndpointObservation::success(
                endpoint,
                &url,
                query_timestamp,
                response.http_status_code,
                response.bytes.len(),
            ),
            Err(err) => {
                let classification = err.classify();
                debug!(
                    service_id = %self.service_id,
                    endpoint = %endpoint.addr(),
                    error_kind = classification.kind.as_str(),
                    error = %err,
                    "relay attempt failed"
                );
                EndpointObservation::failure(
                    endpoint,
                    &url,
                    query_timestamp,
                    classification.kind,
                    err.to_string(),
                    classification.sanction,
                )
            }
        };
        self.observations.endpoint_observations.push(observation);

        result
    }

    async fn send_protocol(
        &self,
        endpoint: &Endpoint,
        url: &str,
        payload: &RelayPayload,
        deadline: Instant,
    ) -> Result<RelayResponse, RelayError> {
        let Some(session) = endpoint.session() else {
            return Err(RelayError::MissingApplication { session_id: String::new() });
        };
        let Some(app) = session.application.as_ref() else {
            return Err(RelayError::MissingApplication { session_id: session.header.session_id.clone() });
        };

        let request = RelayRequest {
            header: session.header.clone(),
            supplier: endpoint.supplier().to_string(),
            payload: payload.data.clone(),
        };
        let signing_error =
            |source| RelayError::Signing { app_address: app.address.clone(), source };
        request.validate().map_err(signing_error)?;

        let signer = Arc::clone(&self.resources.signer);
        let signed = tokio::time::timeout_at(
            deadline,
            self.resources
                .signatures
                .get_or_compute(request, app, move |request| async move { signer.sign(request, app).await }),
        )
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(signing_error)?;
        let body = signed.encode().map_err(signing_error)?;

        let reply = {
            let _permit =
                self.resources.limiter.acquire(deadline).await.ok_or(RelayError::ConcurrencyLimit)?;
            let remaining = remaining(deadline);
            tokio::time::timeout_at(deadline, self.resources.transport.post(url, body, remaining))
                .await
                .map_err(|_| RelayError::Timeout)??
        };

        let validated = tokio::time::timeout_at(
            deadline,
            self.resources.chain.validate_relay_response(endpoint.supplier(), &reply),
        )
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(|source| RelayError::Validation { endpoint: endpoint.addr().clone(), source })?;

        Ok(RelayResponse {
            endpoint_addr: endpoint.addr().clone(),
            bytes: validated.payload,
            http_status_code: validated.http_status_code,
        })
    }

    async fn send_fallback(
        &self,
        endpoint: &Endpoint,
        url: &str,
        payload: &RelayPayload,
        deadline: Instant,
    ) -> Result<RelayResponse, RelayError> {
        let _permit = self.resources.limiter.acquire(deadline).await.ok_or(RelayError::ConcurrencyLimit)?;
        let bytes = tokio::time::timeout_at(
            deadline,
            self.resources.transport.post(url, payload.data.clone(), remaining(deadline)),
        )
        .await
        .map_err(|_| RelayError::Timeout)??;

        Ok(RelayResponse { endpoint_addr: endpoint.addr().clone(), bytes, http_status_code: 200 })
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn target_url(endpoint: &Endpoint, payload: &RelayPayload) -> String {
    let base = endpoint.url_for(payload.rpc_type);
    if payload.path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), payload.path.trim_start_matches('/'))
}
