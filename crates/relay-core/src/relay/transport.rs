use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced while moving relay bytes to and from an endpoint.
///
/// Non-2xx replies are kept apart from failures to reach the endpoint at all, since the
/// two are classified differently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("relay request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("relay request failed: {0}")]
    Request(String),
}

/// Sends serialized relays to endpoints.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    /// POSTs `body` to `url`, returning the raw reply body for 2xx responses.
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<Bytes, TransportError>;
}

/// Configuration for the HTTP relay transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// TCP connect timeout in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle pooled connections are closed after this many seconds (default: 30).
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,

    /// Maximum idle pooled connections kept per host (default: 100).
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_pool_idle_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_user_agent() -> String {
    concat!("relay-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            user_agent: default_user_agent(),
        }
    }
}

/// reqwest-backed [`RelayTransport`].
///
/// Relays are never retried here; a failed relay is classified and sanctioned by the
/// request context instead.
pub struct HttpRelayTransport {
    client: Client,
}

impl HttpRelayTransport {
    /// Creates a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&TransportConfig::default())
    }

    /// Creates a transport with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_seconds))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build relay http client");
                TransportError::Request(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Reduces a reqwest error to a short description without leaking URLs or headers.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "unexpected redirect".to_string()
        } else {
            "network error".to_string()
        }
    }
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<Bytes, TransportError> {
        url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connection(Self::sanitize_network_error(&e))
                } else {
                    TransportError::Request(Self::sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            let body = if raw_text.len() > 256 {
                let cut = (0..=256).rev().find(|i| raw_text.is_char_boundary(*i)).unwrap_or(0);
                format!("{}... (truncated)", &raw_text[..cut])
            } else {
                raw_text
            };
            tracing::trace!(status = status.as_u16(), "relay returned non-success status");
            return Err(TransportError::HttpStatus { status: status.as_u16(), body });
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(Self::sanitize_network_error(&e))
            }
        })
    }
}
