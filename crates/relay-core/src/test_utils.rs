//! Shared fixtures for unit tests.

use crate::{
    chain::{ChainClient, ChainError, ValidatedRelay},
    types::{Application, RpcType, ServiceId, Session, SessionHeader, SupplierEndpoints, SupplierUrl},
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

pub(crate) fn app(address: &str, services: &[&str]) -> Application {
    Application {
        address: address.to_string(),
        public_key: format!("{address}-pubkey"),
        service_ids: services.iter().map(|s| ServiceId::from(*s)).collect(),
    }
}

/// Builds a session whose suppliers each expose one JSON-RPC URL.
pub(crate) fn session(service: &str, app_address: &str, session_id: &str, suppliers: &[(&str, &str)]) -> Session {
    Session {
        header: SessionHeader {
            session_id: session_id.to_string(),
            service_id: service.to_string(),
            app_address: app_address.to_string(),
            start_height: 100,
            end_height: 160,
        },
        application: Some(app(app_address, &[service])),
        suppliers: suppliers
            .iter()
            .map(|(supplier, url)| SupplierEndpoints {
                supplier: (*supplier).to_string(),
                urls: vec![SupplierUrl { rpc_type: RpcType::JsonRpc, url: (*url).to_string() }],
            })
            .collect(),
    }
}

/// In-memory chain client with switchable failure modes.
#[derive(Default)]
pub(crate) struct MockChainClient {
    apps: Mutex<Vec<Application>>,
    sessions: Mutex<HashMap<(String, String), Session>>,
    failing_sessions: Mutex<HashSet<String>>,
    block_height: AtomicU64,
    fail_block_height: AtomicBool,
    fail_apps: AtomicBool,
    reject_relays: AtomicBool,
    session_delay_ms: AtomicU64,
    pub(crate) session_calls: AtomicUsize,
    pub(crate) app_calls: AtomicUsize,
    pub(crate) public_key_calls: AtomicUsize,
}

impl MockChainClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_apps(&self, apps: Vec<Application>) {
        *self.apps.lock() = apps;
    }

    pub(crate) fn insert_session(&self, session: Session) {
        let key = (session.header.service_id.clone(), session.header.app_address.clone());
        self.sessions.lock().insert(key, session);
    }

    pub(crate) fn fail_session_for(&self, app_address: &str) {
        self.failing_sessions.lock().insert(app_address.to_string());
    }

    pub(crate) fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn fail_block_height(&self, fail: bool) {
        self.fail_block_height.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_apps(&self, fail: bool) {
        self.fail_apps.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn reject_relays(&self, reject: bool) {
        self.reject_relays.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn set_session_delay(&self, delay: Duration) {
        self.session_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn fetch_apps(&self) -> Result<Vec<Application>, ChainError> {
        if self.fail_apps.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("mock node down".to_string()));
        }
        Ok(self.apps.lock().clone())
    }

    async fn get_app(&self, address: &str) -> Result<Application, ChainError> {
        self.app_calls.fetch_add(1, Ordering::SeqCst);
        self.apps
            .lock()
            .iter()
            .find(|a| a.address == address)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(address.to_string()))
    }

    async fn get_session(
        &self,
        service_id: &ServiceId,
        app_address: &str,
    ) -> Result<Session, ChainError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.session_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing_sessions.lock().contains(app_address) {
            return Err(ChainError::Rpc(format!("session fetch failed for {app_address}")));
        }
        self.sessions
            .lock()
            .get(&(service_id.to_string(), app_address.to_string()))
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("{service_id}:{app_address}")))
    }

    async fn get_current_block_height(&self) -> Result<u64, ChainError> {
        if self.fail_block_height.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("mock node down".to_string()));
        }
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn validate_relay_response(
        &self,
        _supplier: &str,
        response: &[u8],
    ) -> Result<ValidatedRelay, ChainError> {
        if self.reject_relays.load(Ordering::SeqCst) {
            return Err(ChainError::InvalidRelayResponse("signature mismatch".to_string()));
        }
        Ok(ValidatedRelay { payload: Bytes::copy_from_slice(response), http_status_code: 200 })
    }

    async fn get_account_public_key(&self, address: &str) -> Result<String, ChainError> {
        self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{address}-pubkey"))
    }
}
