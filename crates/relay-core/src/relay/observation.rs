//! Structured observations produced by every relay attempt.
//!
//! Observations are the only channel through which request outcomes feed back into
//! endpoint reputation: the request context records one [`EndpointObservation`] per
//! endpoint it talked to, and the protocol facade hands the batch to the sanction store.

use super::errors::EndpointErrorKind;
use crate::{
    endpoint::Endpoint,
    sanction::SanctionType,
    types::{EndpointAddr, ServiceId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one relay attempt against one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointObservation {
    pub endpoint_addr: EndpointAddr,
    pub supplier: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub is_fallback: bool,

    #[serde(default)]
    pub app_address: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub session_service_id: String,
    #[serde(default)]
    pub session_start_height: u64,
    #[serde(default)]
    pub session_end_height: u64,

    pub query_timestamp: DateTime<Utc>,
    pub response_timestamp: DateTime<Utc>,

    #[serde(default)]
    pub http_status_code: Option<u16>,
    #[serde(default)]
    pub payload_size: Option<usize>,

    #[serde(default)]
    pub error_kind: Option<EndpointErrorKind>,
    #[serde(default)]
    pub error_details: Option<String>,
    #[serde(default)]
    pub recommended_sanction: Option<SanctionType>,
}

impl EndpointObservation {
    fn from_endpoint(endpoint: &Endpoint, url: &str, query_timestamp: DateTime<Utc>) -> Self {
        let header = endpoint.session_header();
        Self {
            endpoint_addr: endpoint.addr().clone(),
            supplier: endpoint.supplier().to_string(),
            endpoint_url: url.to_string(),
            is_fallback: endpoint.is_fallback(),
            app_address: header.map(|h| h.app_address.clone()).unwrap_or_default(),
            session_id: header.map(|h| h.session_id.clone()).unwrap_or_default(),
            session_service_id: header.map(|h| h.service_id.clone()).unwrap_or_default(),
            session_start_height: header.map_or(0, |h| h.start_height),
            session_end_height: header.map_or(0, |h| h.end_height),
            query_timestamp,
            response_timestamp: Utc::now(),
            http_status_code: None,
            payload_size: None,
            error_kind: None,
            error_details: None,
            recommended_sanction: None,
        }
    }

    #[must_use]
    pub fn success(
        endpoint: &Endpoint,
        url: &str,
        query_timestamp: DateTime<Utc>,
        http_status_code: u16,
        payload_size: usize,
    ) -> Self {
        Self {
            http_status_code: Some(http_status_code),
            payload_size: Some(payload_size),
            ..Self::from_endpoint(endpoint, url, query_timestamp)
        }
    }

    #[must_use]
    pub fn failure(
        endpoint: &Endpoint,
        url: &str,
        query_timestamp: DateTime<Utc>,
        error_kind: EndpointErrorKind,
        error_details: String,
        sanction: SanctionType,
    ) -> Self {
        Self {
            error_kind: Some(error_kind),
            error_details: Some(error_details),
            recommended_sanction: Some(sanction),
            ..Self::from_endpoint(endpoint, url, query_timestamp)
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// Request-level failures that happen before any endpoint is contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestErrorKind {
    NoEndpoints,
    EndpointSelection,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub details: String,
}

/// All observations gathered while serving one client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestObservations {
    pub request_id: Uuid,
    pub service_id: ServiceId,
    #[serde(default)]
    pub request_error: Option<RequestError>,
    #[serde(default)]
    pub endpoint_observations: Vec<EndpointObservation>,
}

impl RequestObservations {
    #[must_use]
    pub fn new(request_id: Uuid, service_id: ServiceId) -> Self {
        Self { request_id, service_id, request_error: None, endpoint_observations: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_error.is_none() && self.endpoint_observations.is_empty()
    }
}
