//! Runtime lifecycle management including background tasks and graceful shutdown.

use crate::{chain::ChainClient, config::GatewayConfig, protocol::Gateway};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::builder::GatewayRuntimeBuilder;

/// Owns the gateway and the background tasks that keep it current.
///
/// Four tasks run per gateway: the session cache refresh, the rollover block height poll,
/// the session sanction sweep and the signature cache sweep. Each is started at most once,
/// and all of them stop on [`shutdown`](Self::shutdown).
pub struct GatewayRuntime<C: ChainClient> {
    gateway: Arc<Gateway<C>>,
    shutdown_tx: broadcast::Sender<()>,
    config: GatewayConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl<C: ChainClient> GatewayRuntime<C> {
    #[must_use]
    pub fn builder() -> GatewayRuntimeBuilder<C> {
        GatewayRuntimeBuilder::new()
    }

    pub(super) fn new(gateway: Arc<Gateway<C>>, shutdown_tx: broadcast::Sender<()>, config: GatewayConfig) -> Self {
        Self {
            gateway,
            shutdown_tx,
            config,
            tasks: Mutex::new(Vec::new()),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the background tasks that are not already running.
    ///
    /// Returns how many tasks were started by this call. Does nothing after shutdown.
    pub fn start(&self) -> usize {
        if self.shutdown_initiated.load(Ordering::SeqCst) {
            warn!("Runtime already shut down, not starting background tasks");
            return 0;
        }

        let started: Vec<JoinHandle<()>> = [
            self.gateway.cache().start(self.shutdown_tx.subscribe()),
            self.gateway.rollover().start(self.shutdown_tx.subscribe()),
            self.gateway.sanctions().start_sweeper(self.shutdown_tx.subscribe()),
            self.gateway.signature_cache().start_sweeper(self.shutdown_tx.subscribe()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let count = started.len();
        self.tasks.lock().extend(started);
        debug!(started = count, "Background tasks started");
        count
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway<C>> {
        &self.gateway
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Number of background tasks currently owned by the runtime.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Creates a new shutdown receiver for external shutdown coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task to stop and waits for them to finish.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating gateway runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!("Background task cancelled"),
                Err(e) => error!(error = %e, "Background task failed"),
            }
        }

        info!("Gateway runtime shutdown complete");
    }

    /// Waits for a shutdown signal on the runtime's channel, then cleans up.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }

    /// Sender half of the shutdown channel, for wiring OS signal handlers.
    #[must_use]
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

#[allow(dead_code)]
fn assert_runtime_is_send_sync<C: ChainClient>() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<GatewayRuntime<C>>();
}
