//! Builder for wiring a [`GatewayRuntime`] from configuration and backend handles.

use crate::{
    chain::ChainClient,
    config::GatewayConfig,
    protocol::Gateway,
    relay::{HttpRelayTransport, RelayTransport},
    signing::RelaySigner,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::lifecycle::GatewayRuntime;

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A required backend handle was not supplied
    #[error("Missing runtime component: {0}")]
    MissingComponent(&'static str),

    /// Generic initialization error
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    shutdown_channel_capacity: usize,
    start_background_tasks: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { shutdown_channel_capacity: 16, start_background_tasks: true }
    }
}

/// Builder for constructing a [`GatewayRuntime`].
///
/// The chain client and signer are required. Without an explicit transport, an
/// [`HttpRelayTransport`] is built from the `transport` config section.
///
/// # Examples
///
/// ```ignore
/// let runtime = GatewayRuntime::builder()
///     .with_config(GatewayConfig::load()?)
///     .with_chain_client(Arc::new(client))
///     .with_signer(Arc::new(signer))
///     .build()?;
/// ```
pub struct GatewayRuntimeBuilder<C: ChainClient> {
    config: Option<GatewayConfig>,
    client: Option<Arc<C>>,
    signer: Option<Arc<dyn RelaySigner>>,
    transport: Option<Arc<dyn RelayTransport>>,
    options: RuntimeOptions,
}

impl<C: ChainClient> GatewayRuntimeBuilder<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            client: None,
            signer: None,
            transport: None,
            options: RuntimeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_chain_client(mut self, client: Arc<C>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RelaySigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn RelayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity.max(1);
        self
    }

    /// Builds the components without starting refresh, polling or sweeping. They can be
    /// started later with [`GatewayRuntime::start`].
    #[must_use]
    pub fn without_background_tasks(mut self) -> Self {
        self.options.start_background_tasks = false;
        self
    }

    /// Builds the runtime and, unless disabled, starts its background tasks.
    ///
    /// Must be called from within a Tokio runtime when background tasks are enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, a required
    /// component was not supplied, or the HTTP transport cannot be built.
    pub fn build(self) -> Result<GatewayRuntime<C>, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        let client = self.client.ok_or(RuntimeError::MissingComponent("chain client"))?;
        let signer = self.signer.ok_or(RuntimeError::MissingComponent("relay signer"))?;
        let transport: Arc<dyn RelayTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpRelayTransport::with_config(&config.transport)
                    .map_err(|e| RuntimeError::Initialization(format!("Relay transport: {e}")))?,
            ),
        };

        info!(
            protocol = %config.protocol.name,
            fallback_services = config.protocol.service_fallbacks.len(),
            background_tasks = self.options.start_background_tasks,
            "Initializing gateway runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);
        let gateway = Arc::new(Gateway::new(&config, client, signer, transport));
        debug!("Gateway components initialized");

        let runtime = GatewayRuntime::new(gateway, shutdown_tx, config);
        if self.options.start_background_tasks {
            runtime.start();
        }

        info!("Gateway runtime initialization complete");
        Ok(runtime)
    }
}

impl<C: ChainClient> Default for GatewayRuntimeBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
