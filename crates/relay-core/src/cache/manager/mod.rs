//! Session and endpoint cache.
//!
//! The [`CacheManager`] keeps one immutable [`CacheSnapshot`] of applications, their
//! sessions and the endpoints derived from them. A background task rebuilds the snapshot
//! every refresh interval and publishes it with a single pointer swap, so readers always
//! see one complete snapshot and never wait on a refresh.
//!
//! # Refresh cycle
//!
//! ```text
//! fetch_apps ──► empty or error? ──► skip, keep previous snapshot
//!     │
//!     ▼
//! (service, app) jobs ──► fetch_sessions (bounded workers, failures skipped)
//!     │
//!     ├──► rollover monitor learns session boundaries
//!     ▼
//! per-service endpoints, first seen wins ──► ArcSwap::store
//! ```
//!
//! Point lookups that miss the snapshot go to the chain. Applications fetched that way are
//! kept for one refresh interval; account public keys never change and are kept until
//! evicted by capacity.

mod background;
mod config;


pub use config::{CacheError, CacheRefreshConfig};

use crate::{
    chain::{ChainClient, ChainError, RolloverMonitor},
    endpoint::{endpoints_from_session, merge_first_seen, Endpoint},
    protocol::RequestMetadata,
    types::{Application, EndpointAddr, ServiceId, Session},
};
use arc_swap::ArcSwap;
use background::{fetch_sessions, run_refresh_loop, SessionJob};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

/// One consistent view of the chain state the gateway relays against.
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    pub apps: Vec<Application>,
    /// Sessions keyed by (service, application address).
    pub sessions: HashMap<(ServiceId, String), Arc<Session>>,
    /// Unique endpoints per service across every cached session.
    pub endpoints: HashMap<ServiceId, HashMap<EndpointAddr, Endpoint>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    #[must_use]
    pub fn session(&self, service_id: &ServiceId, app_address: &str) -> Option<&Arc<Session>> {
        self.sessions.get(&(service_id.clone(), app_address.to_string()))
    }

    /// Services served by at least one cached application, sorted.
    #[must_use]
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.apps
            .iter()
            .flat_map(|app| app.service_ids.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Summary of a completed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub apps: usize,
    pub sessions_attempted: usize,
    pub sessions_fetched: usize,
    pub endpoints: usize,
    pub duplicate_endpoints: usize,
}

const LOOKUP_CAPACITY: u64 = 100_000;

/// Periodically refreshed cache of applications, sessions and endpoints.
pub struct CacheManager<C: ChainClient> {
    client: Arc<C>,
    config: CacheRefreshConfig,
    snapshot: ArcSwap<CacheSnapshot>,
    rollover: Option<Arc<RolloverMonitor<C>>>,
    /// Applications fetched on a snapshot miss.
    app_lookups: Cache<String, Application>,
    public_keys: Cache<String, String>,
    apps_seen: AtomicBool,
    sessions_seen: AtomicBool,
    started: AtomicBool,
}

impl<C: ChainClient> CacheManager<C> {
    #[must_use]
    pub fn new(client: Arc<C>, config: CacheRefreshConfig) -> Self {
        let app_lookups =
            Cache::builder().max_capacity(LOOKUP_CAPACITY).time_to_live(config.refresh_interval()).build();
        let public_keys = Cache::builder().max_capacity(LOOKUP_CAPACITY).build();

        Self {
            client,
            config,
            snapshot: ArcSwap::from_pointee(CacheSnapshot::default()),
            rollover: None,
            app_lookups,
            public_keys,
            apps_seen: AtomicBool::new(false),
            sessions_seen: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Feeds session boundaries from every refresh into `monitor`.
    #[must_use]
    pub fn with_rollover(mut self, monitor: Arc<RolloverMonitor<C>>) -> Self {
        self.rollover = Some(monitor);
        self
    }

    #[must_use]
    pub fn config(&self) -> &CacheRefreshConfig {
        &self.config
    }

    /// Current snapshot. Holding it keeps that snapshot alive across later refreshes.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.load_full()
    }

    /// True once a refresh has produced both applications and sessions.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.apps_seen.load(Ordering::Acquire) && self.sessions_seen.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.snapshot.load().service_ids()
    }

    /// Returns the session of `app_address` on `service_id`, asking the chain on a miss.
    ///
    /// A session fetched without its application, or with an application lacking a public
    /// key, is completed through [`get_app`](Self::get_app) and
    /// [`get_account_public_key`](Self::get_account_public_key).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::SessionLookup`] if the session is not cached and the chain
    /// lookup fails, or [`CacheError::Timeout`] if it times out. Failing to complete the
    /// application is returned as the corresponding lookup error.
    pub async fn get_session(&self, service_id: &ServiceId, app_address: &str) -> Result<Arc<Session>, CacheError> {
        if let Some(session) = self.snapshot.load().session(service_id, app_address) {
            return Ok(Arc::clone(session));
        }

        debug!(service_id = %service_id, app = %app_address, "session cache miss, querying chain");
        let timeout = self.config.fetch_timeout();
        let session = tokio::time::timeout(timeout, self.client.get_session(service_id, app_address))
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(|source| CacheError::SessionLookup {
                service_id: service_id.clone(),
                app_address: app_address.to_string(),
                source,
            })?;

        let session = self.with_application(session).await?;

        if let Some(monitor) = &self.rollover {
            monitor.record_session(&session.header);
        }
        Ok(Arc::new(session))
    }

    async fn with_application(&self, mut session: Session) -> Result<Session, CacheError> {
        if session.application.is_none() {
            debug!(session_id = %session.header.session_id, "session without application, resolving");
            session.application = Some(self.get_app(&session.header.app_address).await?);
        }
        if let Some(app) = session.application.as_mut() {
            if app.public_key.is_empty() {
                app.public_key = self.get_account_public_key(&app.address).await?;
            }
        }
        Ok(session)
    }

    /// Returns the application at `address`, from the snapshot when present.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AppLookup`] if the chain lookup fails or times out. Failed
    /// lookups are not cached.
    pub async fn get_app(&self, address: &str) -> Result<Application, CacheError> {
        if let Some(app) = self.snapshot.load().apps.iter().find(|app| app.address == address) {
            return Ok(app.clone());
        }

        let timeout = self.config.fetch_timeout();
        self.app_lookups
            .try_get_with(address.to_string(), async {
                tokio::time::timeout(timeout, self.client.get_app(address)).await.unwrap_or(Err(ChainError::Timeout))
            })
            .await
            .map_err(|source| CacheError::AppLookup { address: address.to_string(), source: (*source).clone() })
    }

    /// Returns the public key of the account at `address`.
    ///
    /// Concurrent lookups of one address share a single chain call.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AccountLookup`] if the chain lookup fails or times out.
    pub async fn get_account_public_key(&self, address: &str) -> Result<String, CacheError> {
        let timeout = self.config.fetch_timeout();
        self.public_keys
            .try_get_with(address.to_string(), async {
                tokio::time::timeout(timeout, self.client.get_account_public_key(address)).await.unwrap_or(Err(ChainError::Timeout))
            })
            .await
            .map_err(|source| CacheError::AccountLookup { address: address.to_string(), source: (*source).clone() })
    }

    /// Endpoints currently able to serve `service_id`.
    ///
    /// `metadata.app_address` restricts the result to that application's session and
    /// `metadata.target_supplier` to that supplier's endpoints. The result may be empty.
    #[must_use]
    pub fn get_service_endpoints(
        &self,
        service_id: &ServiceId,
        metadata: &RequestMetadata,
    ) -> HashMap<EndpointAddr, Endpoint> {
        let snapshot = self.snapshot.load();
        let supplier = metadata.target_supplier.as_deref();

        if let Some(app_address) = metadata.app_address.as_deref() {
            return snapshot
                .session(service_id, app_address)
                .map(|session| endpoints_from_session(session, supplier))
                .unwrap_or_default();
        }

        let Some(endpoints) = snapshot.endpoints.get(service_id) else {
            return HashMap::new();
        };

        match supplier {
            Some(supplier) => endpoints
                .iter()
                .filter(|(_, endpoint)| endpoint.supplier() == supplier)
                .map(|(addr, endpoint)| (addr.clone(), endpoint.clone()))
                .collect(),
            None => endpoints.clone(),
        }
    }

    /// Runs one refresh cycle and publishes the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the cycle was skipped: the app fetch failed or timed out,
    /// returned no applications, or every session fetch failed. The previous snapshot
    /// stays in place in all of these cases.
    pub async fn refresh(&self) -> Result<RefreshStats, CacheError> {
        let result = self.refresh_inner().await;
        let label = if result.is_ok() { "success" } else { "skipped" };
        metrics::counter!("relay_cache_refresh_total", "result" => label).increment(1);
        result
    }

    async fn refresh_inner(&self) -> Result<RefreshStats, CacheError> {
        let timeout = self.config.fetch_timeout();
        let apps = tokio::time::timeout(timeout, self.client.fetch_apps())
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(CacheError::AppFetch)?;

        if apps.is_empty() {
            return Err(CacheError::NoApplications);
        }
        self.apps_seen.store(true, Ordering::Release);

        let jobs: Vec<SessionJob> = apps
            .iter()
            .flat_map(|app| {
                app.service_ids.iter().map(|service_id| SessionJob {
                    service_id: service_id.clone(),
                    app_address: app.address.clone(),
                })
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let attempted = jobs.len();

        let mut fetched = fetch_sessions(&self.client, jobs, self.config.workers(), timeout).await;
        if fetched.is_empty() && attempted > 0 {
            return Err(CacheError::NoSessions { attempted });
        }
        // Completion order is arbitrary; sort so first-seen dedup is deterministic.
        fetched.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sessions = HashMap::with_capacity(fetched.len());
        let mut endpoints: HashMap<ServiceId, HashMap<EndpointAddr, Endpoint>> = HashMap::new();
        let mut duplicate_endpoints = 0;

        for (job, session) in fetched {
            if let Some(monitor) = &self.rollover {
                monitor.record_session(&session.header);
            }
            let service_endpoints = endpoints.entry(job.service_id.clone()).or_default();
            duplicate_endpoints +=
                merge_first_seen(service_endpoints, endpoints_from_session(&session, None).into_values());
            sessions.insert((job.service_id, job.app_address), session);
        }

        let stats = RefreshStats {
            apps: apps.len(),
            sessions_attempted: attempted,
            sessions_fetched: sessions.len(),
            endpoints: endpoints.values().map(HashMap::len).sum(),
            duplicate_endpoints,
        };

        if !sessions.is_empty() {
            self.sessions_seen.store(true, Ordering::Release);
        }

        self.snapshot.store(Arc::new(CacheSnapshot {
            apps,
            sessions,
            endpoints,
            refreshed_at: Some(Utc::now()),
        }));

        metrics::gauge!("relay_cached_sessions").set(stats.sessions_fetched as f64);
        metrics::gauge!("relay_cached_endpoints").set(stats.endpoints as f64);
        info!(
            apps = stats.apps,
            sessions = stats.sessions_fetched,
            attempted = stats.sessions_attempted,
            endpoints = stats.endpoints,
            duplicates = stats.duplicate_endpoints,
            "cache refreshed"
        );

        Ok(stats)
    }

    /// Starts the background refresh task.
    ///
    /// Returns `None` if it was already started; a manager never runs two refresh loops.
    pub fn start(self: &Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if self.started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("cache refresh task already started");
            return None;
        }

        info!(
            interval_secs = self.config.refresh_interval().as_secs(),
            workers = self.config.workers(),
            "starting cache refresh task"
        );
        Some(tokio::spawn(run_refresh_loop(Arc::clone(self), shutdown_rx)))
    }
}
