//! Signer, transport and selector doubles.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::{
    relay::{EndpointSelector, RelayTransport, TransportError},
    signing::{RelayRequest, RelaySigner, SignedRelay, SignerError},
    types::{Application, EndpointAddr, ServiceId},
};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

/// Signs with a fixed signature derived from the application address.
#[derive(Default)]
pub struct MockSigner {
    pub calls: AtomicUsize,
}

impl MockSigner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySigner for MockSigner {
    async fn sign(&self, request: RelayRequest, app: &Application) -> Result<SignedRelay, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SignedRelay { request, signature: Bytes::from(format!("sig:{}", app.address)) })
    }
}

#[derive(Clone)]
enum Script {
    Delay(Duration),
    Fail(TransportError),
}

/// Transport that echoes the request body unless a URL prefix is scripted otherwise.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<(String, Bytes)>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays replies from URLs starting with `prefix`.
    pub fn delay(&self, prefix: &str, delay: Duration) {
        self.scripts.lock().insert(prefix.to_string(), Script::Delay(delay));
    }

    /// Fails requests to URLs starting with `prefix`.
    pub fn fail(&self, prefix: &str, error: TransportError) {
        self.scripts.lock().insert(prefix.to_string(), Script::Fail(error));
    }

    /// URLs posted to, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    fn script_for(&self, url: &str) -> Option<Script> {
        self.scripts
            .lock()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone())
    }
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn post(&self, url: &str, body: Bytes, _timeout: Duration) -> Result<Bytes, TransportError> {
        self.requests.lock().push((url.to_string(), body.clone()));
        match self.script_for(url) {
            Some(Script::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(Script::Fail(error)) => Err(error),
            None => Ok(body),
        }
    }
}

/// Picks the first candidate whose address contains `needle`, else the lowest address.
pub struct PrefixSelector(pub &'static str);

impl EndpointSelector for PrefixSelector {
    fn select(&self, _service_id: &ServiceId, candidates: &[EndpointAddr]) -> Result<EndpointAddr, String> {
        candidates
            .iter()
            .find(|addr| addr.as_str().contains(self.0))
            .or_else(|| candidates.iter().min())
            .cloned()
            .ok_or_else(|| "no candidates".to_string())
    }
}
