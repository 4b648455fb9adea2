//! Session rollover detection.
//!
//! Suppliers can lag behind the gateway's view of the current session for a few blocks
//! around a session boundary. The [`RolloverMonitor`] polls the chain's block height and
//! flags the window `[session_end - 1, session_end + grace_period_blocks]` so that callers
//! can degrade gracefully (shorter waits, fallback endpoints, dropping streams) while the
//! network settles.

use super::{ChainClient, ChainError};
use crate::types::SessionHeader;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle, time::interval};
use tracing::{debug, info, warn};

/// Configuration for the rollover monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverConfig {
    /// Blocks after the session end height that are still considered unstable.
    #[serde(default = "default_grace_period_blocks")]
    pub grace_period_blocks: u64,

    /// Block height poll interval in seconds (default: 15).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Timeout for a single block height request in seconds (default: 10).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
}

fn default_grace_period_blocks() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    15
}

fn default_call_timeout() -> u64 {
    10
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            grace_period_blocks: default_grace_period_blocks(),
            poll_interval_seconds: default_poll_interval(),
            call_timeout_seconds: default_call_timeout(),
        }
    }
}

impl RolloverConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RolloverWindow {
    start: u64,
    end: u64,
}

#[derive(Debug, Default)]
struct RolloverState {
    block_height: Option<u64>,
    window: Option<RolloverWindow>,
}

impl RolloverState {
    /// Missing data on either side means "not in rollover".
    fn in_rollover(&self) -> bool {
        match (self.block_height, self.window) {
            (Some(height), Some(window)) => height >= window.start && height <= window.end,
            _ => false,
        }
    }
}

/// Point-in-time view of the monitor, for logging and admin surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloverStatus {
    pub block_height: Option<u64>,
    pub rollover_start: Option<u64>,
    pub rollover_end: Option<u64>,
    pub in_rollover: bool,
}

/// Background block-height poller exposing an "in session rollover" flag.
pub struct RolloverMonitor<C: ChainClient> {
    client: Arc<C>,
    config: RolloverConfig,
    state: RwLock<RolloverState>,
    started: AtomicBool,
}

impl<C: ChainClient> RolloverMonitor<C> {
    #[must_use]
    pub fn new(client: Arc<C>, config: RolloverConfig) -> Self {
        Self {
            client,
            config,
            state: RwLock::new(RolloverState::default()),
            started: AtomicBool::new(false),
        }
    }

    /// Returns true while the latest block height is inside the rollover window.
    #[must_use]
    pub fn is_in_rollover(&self) -> bool {
        self.state.read().in_rollover()
    }

    #[must_use]
    pub fn status(&self) -> RolloverStatus {
        let state = self.state.read();
        RolloverStatus {
            block_height: state.block_height,
            rollover_start: state.window.map(|w| w.start),
            rollover_end: state.window.map(|w| w.end),
            in_rollover: state.in_rollover(),
        }
    }

    /// Records a new block height.
    ///
    /// Returns `false` if the height is not newer than the one already stored.
    pub fn record_block_height(&self, height: u64) -> bool {
        if height == 0 {
            return false;
        }

        let mut state = self.state.write();
        if state.block_height.is_some_and(|current| current >= height) {
            return false;
        }
        state.block_height = Some(height);

        debug!(
            current_height = height,
            rollover_start = ?state.window.map(|w| w.start),
            rollover_end = ?state.window.map(|w| w.end),
            in_rollover = state.in_rollover(),
            "block height updated"
        );
        true
    }

    /// Records the boundaries of a session observed by the gateway.
    ///
    /// The window is only moved when it is unset or when the chain has already progressed
    /// past its end, so sessions fetched out of order cannot shrink an active window.
    pub fn record_session(&self, header: &SessionHeader) {
        if header.end_height == 0 {
            warn!(session_id = %header.session_id, "session has no end height, ignoring");
            return;
        }

        let mut state = self.state.write();
        let expired = match (state.window, state.block_height) {
            (None, _) => true,
            (Some(window), Some(height)) => height > window.end,
            (Some(_), None) => false,
        };
        if !expired {
            return;
        }

        let window = RolloverWindow {
            start: header.end_height.saturating_sub(1),
            end: header.end_height.saturating_add(self.config.grace_period_blocks),
        };
        if state.window != Some(window) {
            debug!(
                session_end_height = header.end_height,
                rollover_start = window.start,
                rollover_end = window.end,
                current_block_height = ?state.block_height,
                "rollover boundaries updated"
            );
        }
        state.window = Some(window);
    }

    /// Fetches the latest block height once and records it.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Timeout`] if the node does not answer within the configured
    /// call timeout, or the client's error otherwise.
    pub async fn poll_once(&self) -> Result<u64, ChainError> {
        let height = tokio::time::timeout(
            self.config.call_timeout(),
            self.client.get_current_block_height(),
        )
        .await
        .map_err(|_| ChainError::Timeout)??;

        self.record_block_height(height);
        Ok(height)
    }

    /// Starts the polling loop.
    ///
    /// Returns `None` if the loop was already started on this monitor.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if self.started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            warn!("rollover monitor already started");
            return None;
        }

        let monitor = Arc::clone(self);
        info!(
            poll_interval_secs = monitor.config.poll_interval_seconds,
            grace_period_blocks = monitor.config.grace_period_blocks,
            "starting session rollover monitor"
        );

        Some(tokio::spawn(async move {
            let mut ticker = interval(monitor.config.poll_interval());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.poll_once().await {
                            warn!(error = %e, "failed to get current block height");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("rollover monitor shutting down");
                        break;
                    }
                }
            }
        }))
    }
}
