//! Background refresh for the cache manager.
//!
//! - `run_refresh_loop` drives one refresh immediately and then one per interval until the
//!   shutdown signal arrives
//! - `fetch_sessions` fans session lookups out over a bounded number of concurrent workers
//!
//! A refresh that overruns the interval delays the next tick instead of stacking cycles.

use super::CacheManager;
use crate::{
    chain::ChainClient,
    types::{ServiceId, Session},
};
use futures::stream::{self, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{debug, info, warn};

/// One session to fetch during a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SessionJob {
    pub service_id: ServiceId,
    pub app_address: String,
}

/// Runs the refresh loop until `shutdown_rx` fires.
pub(crate) async fn run_refresh_loop<C: ChainClient>(
    manager: Arc<CacheManager<C>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(manager.config.refresh_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = manager.refresh().await {
                    warn!(error = %e, "cache refresh skipped, serving previous snapshot");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("cache refresh task shutting down");
                break;
            }
        }
    }
}

/// Fetches every session in `jobs` with at most `workers` lookups in flight.
///
/// Failed or timed-out lookups are logged and left out of the result.
pub(crate) async fn fetch_sessions<C: ChainClient>(
    client: &Arc<C>,
    jobs: Vec<SessionJob>,
    workers: usize,
    timeout: Duration,
) -> Vec<(SessionJob, Arc<Session>)> {
    let total = jobs.len();

    let sessions: Vec<(SessionJob, Arc<Session>)> = stream::iter(jobs)
        .map(|job| async move {
            let fetched =
                tokio::time::timeout(timeout, client.get_session(&job.service_id, &job.app_address)).await;
            match fetched {
                Ok(Ok(session)) => Some((job, Arc::new(session))),
                Ok(Err(e)) => {
                    warn!(
                        service_id = %job.service_id,
                        app = %job.app_address,
                        error = %e,
                        "session fetch failed, skipping"
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        service_id = %job.service_id,
                        app = %job.app_address,
                        timeout_secs = timeout.as_secs(),
                        "session fetch timed out, skipping"
                    );
                    None
                }
            }
        })
        .buffer_unordered(workers)
        .filter_map(|result| async move { result })
        .collect()
        .await;

    debug!(fetched = sessions.len(), total, workers, "session fetch round complete");
    sessions
}
