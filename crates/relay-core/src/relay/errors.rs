//! Relay errors and their classification into endpoint error kinds and sanctions.

use super::transport::TransportError;
use crate::{
    chain::ChainError,
    sanction::SanctionType,
    signing::SignerError,
    types::{EndpointAddr, ServiceId},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Endpoint-facing classification of a failed relay.
///
/// Every kind maps to exactly one recommended sanction:
/// - endpoint faults (timeouts, connection failures, bad payloads, quota exhaustion,
///   unsupported services) recommend a session-scoped sanction
/// - internal inconsistencies recommend nothing, since the endpoint is not at fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointErrorKind {
    Timeout,
    ConnectionFailed,
    InvalidPayload,
    MaxedOut,
    Misconfigured,
    Internal,
}

impl EndpointErrorKind {
    #[must_use]
    pub fn recommended_sanction(self) -> SanctionType {
        match self {
            Self::Timeout |
            Self::ConnectionFailed |
            Self::InvalidPayload |
            Self::MaxedOut |
            Self::Misconfigured => SanctionType::Session,
            Self::Internal => SanctionType::Unspecified,
        }
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::InvalidPayload => "invalid_payload",
            Self::MaxedOut => "maxed_out",
            Self::Misconfigured => "misconfigured",
            Self::Internal => "internal",
        }
    }
}

/// Result of classifying a [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: EndpointErrorKind,
    pub sanction: SanctionType,
}

impl From<EndpointErrorKind> for ErrorClassification {
    fn from(kind: EndpointErrorKind) -> Self {
        Self { kind, sanction: kind.recommended_sanction() }
    }
}

/// Errors surfaced by a relay request context.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("no endpoints available for service {0}")]
    NoEndpoints(ServiceId),

    #[error("no endpoint has been selected on service {0}")]
    NoEndpointSelected(ServiceId),

    #[error("selected endpoint {endpoint} is not a candidate for service {service_id}")]
    EndpointNotFound { endpoint: EndpointAddr, service_id: ServiceId },

    #[error("endpoint selection failed for service {service_id}: {reason}")]
    SelectionFailed { service_id: ServiceId, reason: String },

    #[error("request context for service {0} was already dispatched")]
    AlreadyDispatched(ServiceId),

    #[error("session {session_id} has no application")]
    MissingApplication { session_id: String },

    #[error("error signing the relay request for app {app_address}: {source}")]
    Signing {
        app_address: String,
        #[source]
        source: SignerError,
    },

    #[error("concurrency limit reached before the relay deadline")]
    ConcurrencyLimit,

    #[error("relay deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("error verifying the relay response from endpoint {endpoint}: {source}")]
    Validation {
        endpoint: EndpointAddr,
        #[source]
        source: ChainError,
    },

    #[error("no fallback endpoints available for service {0}")]
    NoFallbackEndpoints(ServiceId),
}

impl RelayError {
    /// Classifies this error into an endpoint error kind and a recommended sanction.
    ///
    /// Known variants map directly; free-form messages fall back to substring matching.
    /// Anything still unrecognized is logged and treated as an internal error so that new
    /// failure modes get noticed instead of silently sanctioning endpoints.
    #[must_use]
    pub fn classify(&self) -> ErrorClassification {
        let kind = match self {
            Self::NoEndpoints(_) |
            Self::NoEndpointSelected(_) |
            Self::EndpointNotFound { .. } |
            Self::SelectionFailed { .. } |
            Self::AlreadyDispatched(_) |
            Self::MissingApplication { .. } |
            Self::Signing { .. } |
            Self::ConcurrencyLimit |
            Self::NoFallbackEndpoints(_) => EndpointErrorKind::Internal,

            Self::Timeout | Self::Transport(TransportError::Timeout) => EndpointErrorKind::Timeout,

            Self::Transport(TransportError::Connection(message)) => {
                classify_message(message).unwrap_or(EndpointErrorKind::ConnectionFailed)
            }
            Self::Transport(TransportError::InvalidUrl(_)) => EndpointErrorKind::Misconfigured,
            Self::Transport(TransportError::HttpStatus { status, body }) => {
                classify_message(body).unwrap_or(if *status == 429 {
                    EndpointErrorKind::MaxedOut
                } else {
                    EndpointErrorKind::InvalidPayload
                })
            }

            Self::Validation { source: ChainError::Timeout, .. } => EndpointErrorKind::Timeout,
            Self::Validation { source: ChainError::InvalidRelayResponse(message), .. } => {
                classify_message(message).unwrap_or(EndpointErrorKind::InvalidPayload)
            }

            other => {
                let message = other.to_string();
                match classify_message(&message) {
                    Some(kind) => kind,
                    None => {
                        error!(
                            error = %message,
                            "unrecognized relay error type encountered, classification needs an update"
                        );
                        EndpointErrorKind::Internal
                    }
                }
            }
        };

        kind.into()
    }
}

/// Substring heuristics for errors that only carry a message.
fn classify_message(message: &str) -> Option<EndpointErrorKind> {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("evidence is sealed") ||
        (has("codespace: pocketcore") && has("code: 90")) ||
        has("maxed out") ||
        has("rate limit")
    {
        return Some(EndpointErrorKind::MaxedOut);
    }

    if has("service not configured") || has("unsupported service") || has("chain not supported") {
        return Some(EndpointErrorKind::Misconfigured);
    }

    if has("context deadline exceeded") ||
        has("i/o timeout") ||
        has("timed out") ||
        (has("dial tcp") && has("timeout"))
    {
        return Some(EndpointErrorKind::Timeout);
    }

    if has("connection refused") ||
        has("connection reset") ||
        has("no route to host") ||
        has("network is unreachable") ||
        has("broken pipe") ||
        has("dial tcp: lookup") ||
        has("no such host") ||
        has("tls: ") ||
        has("certificate")
    {
        return Some(EndpointErrorKind::ConnectionFailed);
    }

    if has("malformed http") ||
        has("invalid status") ||
        has("non json response") ||
        has("unexpected eof") ||
        has("contentlength")
    {
        return Some(EndpointErrorKind::InvalidPayload);
    }

    None
}
