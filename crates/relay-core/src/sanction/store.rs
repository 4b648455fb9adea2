use super::{Sanction, SanctionConfig, SanctionType, SessionSanctionKey};
use crate::{
    cache::expiring::ExpiringMap,
    endpoint::Endpoint,
    relay::EndpointObservation,
    types::{EndpointAddr, ServiceId},
};
use chrono::Utc;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// One sanction as reported by [`SanctionStore::sanction_details`].
#[derive(Debug, Clone, Serialize)]
pub struct SanctionRecord {
    pub endpoint_addr: EndpointAddr,
    pub sanction_type: SanctionType,
    #[serde(flatten)]
    pub sanction: Sanction,
}

/// Snapshot of active sanctions, optionally restricted to one service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SanctionDetails {
    pub permanent: Vec<SanctionRecord>,
    pub session: Vec<SanctionRecord>,
    pub permanent_count: usize,
    pub session_count: usize,
}

/// Stores permanent and session-scoped sanctions.
///
/// The permanent map sits behind an async reader-writer lock: filtering happens on every
/// request while writes only follow failed relays. Session sanctions live in an
/// [`ExpiringMap`], which locks internally.
pub struct SanctionStore {
    config: SanctionConfig,
    permanent: RwLock<HashMap<EndpointAddr, Sanction>>,
    session: ExpiringMap<SessionSanctionKey, Sanction>,
    started: AtomicBool,
}

impl SanctionStore {
    #[must_use]
    pub fn new(config: SanctionConfig) -> Self {
        Self {
            session: ExpiringMap::new(config.session_ttl()),
            config,
            permanent: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SanctionConfig {
        &self.config
    }

    /// Records the sanctions recommended by a batch of observations.
    pub async fn apply_observations(&self, observations: &[EndpointObservation]) {
        if observations.is_empty() {
            warn!("received empty observation batch, no sanctions applied");
            return;
        }

        for observation in observations {
            let Some(sanction_type) = observation.recommended_sanction else {
                continue;
            };

            match sanction_type {
                SanctionType::Unspecified | SanctionType::DoNotSanction => continue,
                SanctionType::Unrecognized => {
                    warn!(
                        endpoint = %observation.endpoint_addr,
                        "unrecognized sanction type in observation, ignoring"
                    );
                    continue;
                }
                SanctionType::Permanent | SanctionType::Session => {}
            }

            if observation.is_fallback {
                debug!(endpoint = %observation.endpoint_addr, "not sanctioning fallback endpoint");
                continue;
            }

            let sanction = Sanction {
                reason: observation.error_details.clone().unwrap_or_default(),
                error_kind: observation.error_kind,
                created_at: Utc::now(),
                supplier: observation.supplier.clone(),
                endpoint_url: observation.endpoint_url.clone(),
                app_address: observation.app_address.clone(),
                session_id: observation.session_id.clone(),
                session_service_id: observation.session_service_id.clone(),
                session_start_height: observation.session_start_height,
            };

            if sanction_type == SanctionType::Permanent {
                info!(
                    endpoint = %observation.endpoint_addr,
                    supplier = %observation.supplier,
                    reason = %sanction.reason,
                    "applying permanent sanction"
                );
                self.permanent.write().await.insert(observation.endpoint_addr.clone(), sanction);
            } else {
                debug!(
                    endpoint = %observation.endpoint_addr,
                    app = %observation.app_address,
                    session_id = %observation.session_id,
                    reason = %sanction.reason,
                    "applying session sanction"
                );
                let key = SessionSanctionKey {
                    app_address: observation.app_address.clone(),
                    session_id: observation.session_id.clone(),
                    endpoint_addr: observation.endpoint_addr.clone(),
                };
                self.session.insert(key, sanction);
            }

            metrics::counter!("relay_sanctions_applied_total", "type" => sanction_type.as_str())
                .increment(1);
        }
    }

    /// Returns the reason `endpoint` is sanctioned, checking permanent sanctions first.
    pub async fn is_sanctioned(&self, endpoint: &Endpoint) -> Option<String> {
        let permanent = self.permanent.read().await;
        self.check(&permanent, endpoint)
    }

    fn check(&self, permanent: &HashMap<EndpointAddr, Sanction>, endpoint: &Endpoint) -> Option<String> {
        if let Some(sanction) = permanent.get(endpoint.addr()) {
            return Some(format!("permanent sanction: {}", sanction.reason));
        }

        let header = endpoint.session_header()?;
        let key = SessionSanctionKey {
            app_address: header.app_address.clone(),
            session_id: header.session_id.clone(),
            endpoint_addr: endpoint.addr().clone(),
        };
        self.session.get(&key).map(|sanction| format!("session sanction: {}", sanction.reason))
    }

    /// Drops every sanctioned endpoint from `candidates`.
    pub async fn filter_sanctioned_endpoints(
        &self,
        candidates: HashMap<EndpointAddr, Endpoint>,
    ) -> HashMap<EndpointAddr, Endpoint> {
        let permanent = self.permanent.read().await;
        candidates
            .into_iter()
            .filter(|(addr, endpoint)| match self.check(&permanent, endpoint) {
                Some(reason) => {
                    debug!(endpoint = %addr, reason = %reason, "filtering sanctioned endpoint");
                    false
                }
                None => true,
            })
            .collect()
    }

    /// Lists active sanctions. When `service_id` is set, only sanctions created while
    /// serving that service are reported.
    pub async fn sanction_details(&self, service_id: Option<&ServiceId>) -> SanctionDetails {
        let matches_service = |sanction: &Sanction| {
            service_id.map_or(true, |id| sanction.session_service_id == id.as_str())
        };

        let permanent: Vec<SanctionRecord> = self
            .permanent
            .read()
            .await
            .iter()
            .filter(|(_, sanction)| matches_service(sanction))
            .map(|(addr, sanction)| SanctionRecord {
                endpoint_addr: addr.clone(),
                sanction_type: SanctionType::Permanent,
                sanction: sanction.clone(),
            })
            .collect();

        let session: Vec<SanctionRecord> = self
            .session
            .live_entries()
            .into_iter()
            .filter(|(_, sanction)| matches_service(sanction))
            .map(|(key, sanction)| SanctionRecord {
                endpoint_addr: key.endpoint_addr,
                sanction_type: SanctionType::Session,
                sanction,
            })
            .collect();

        SanctionDetails {
            permanent_count: permanent.len(),
            session_count: session.len(),
            permanent,
            session,
        }
    }

    /// Evicts expired session sanctions, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let removed = self.session.sweep();
        if removed > 0 {
            debug!(removed, remaining = self.session.len(), "swept expired session sanctions");
        }
        removed
    }

    /// Removes every sanction.
    pub async fn clear(&self) {
        self.permanent.write().await.clear();
        self.session.clear();
        info!("all sanctions cleared");
    }

    /// Starts the periodic sweep of expired session sanctions.
    ///
    /// Returns `None` if the sweeper was already started.
    pub fn start_sweeper(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("sanction sweeper already started");
            return None;
        }

        let store = Arc::clone(self);
        let period = store.config.sweep_interval();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately and there is nothing to sweep yet.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        store.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        info!("sanction sweeper shutting down");
                        break;
                    }
                }
            }
        }))
    }
}
