//! In-memory chain client.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::{
    chain::{ChainClient, ChainError, ValidatedRelay},
    types::{Application, ServiceId, Session},
};
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

/// Chain client backed by maps the test can mutate between refreshes.
#[derive(Default)]
pub struct MockChain {
    apps: Mutex<Vec<Application>>,
    sessions: Mutex<HashMap<(String, String), Session>>,
    failing_sessions: Mutex<HashSet<String>>,
    block_height: AtomicU64,
    healthy: AtomicBool,
    reject_relays: AtomicBool,
    pub app_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
}

impl MockChain {
    #[must_use]
    pub fn new() -> Self {
        Self { healthy: AtomicBool::new(true), ..Self::default() }
    }

    pub fn set_apps(&self, apps: Vec<Application>) {
        *self.apps.lock() = apps;
    }

    pub fn insert_session(&self, session: Session) {
        let key = (session.header.service_id.clone(), session.header.app_address.clone());
        self.sessions.lock().insert(key, session);
    }

    pub fn fail_session_for(&self, app_address: &str) {
        self.failing_sessions.lock().insert(app_address.to_string());
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn reject_relays(&self, reject: bool) {
        self.reject_relays.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn fetch_apps(&self) -> Result<Vec<Application>, ChainError> {
        self.app_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.apps.lock().clone())
    }

    async fn get_app(&self, address: &str) -> Result<Application, ChainError> {
        self.apps
            .lock()
            .iter()
            .find(|app| app.address == address)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(address.to_string()))
    }

    async fn get_session(&self, service_id: &ServiceId, app_address: &str) -> Result<Session, ChainError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_sessions.lock().contains(app_address) {
            return Err(ChainError::Rpc(format!("session unavailable for {app_address}")));
        }
        self.sessions
            .lock()
            .get(&(service_id.to_string(), app_address.to_string()))
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("{service_id}:{app_address}")))
    }

    async fn get_current_block_height(&self) -> Result<u64, ChainError> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn validate_relay_response(&self, supplier: &str, response: &[u8]) -> Result<ValidatedRelay, ChainError> {
        if self.reject_relays.load(Ordering::SeqCst) {
            return Err(ChainError::InvalidRelayResponse(format!("bad signature from {supplier}")));
        }
        Ok(ValidatedRelay { payload: Bytes::copy_from_slice(response), http_status_code: 200 })
    }

    async fn get_account_public_key(&self, address: &str) -> Result<String, ChainError> {
        Ok(format!("{address}-pubkey"))
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
