//! Integration tests for the gateway runtime lifecycle.
//!
//! These tests verify the behavioral contracts of the runtime:
//! - Background tasks start once and keep the cache current
//! - Shutdown is idempotent and reaches every receiver
//! - Builder validation catches configuration errors early
//!
//! Tests use `tokio::time::timeout` so a broken contract fails instead of hanging.

use crate::mock_infrastructure::{create_test_session, eth_scenario, MockChain, MockSigner, MockTransport};
use relay_core::{
    config::GatewayConfig,
    protocol::{HealthCheck, Protocol, RequestMetadata},
    runtime::{GatewayRuntime, RuntimeError},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::time::{timeout, Duration};

fn build_runtime(chain: Arc<MockChain>, config: GatewayConfig) -> GatewayRuntime<MockChain> {
    GatewayRuntime::builder()
        .with_config(config)
        .with_chain_client(chain)
        .with_signer(Arc::new(MockSigner::new()))
        .with_transport(Arc::new(MockTransport::new()))
        .build()
        .expect("Failed to build runtime")
}

async fn wait_until_alive(runtime: &GatewayRuntime<MockChain>) {
    timeout(Duration::from_secs(5), async {
        while !runtime.gateway().is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gateway becomes alive after the first refresh");
}

#[tokio::test]
async fn test_runtime_serves_after_first_refresh() {
    let chain = eth_scenario();
    let runtime = build_runtime(Arc::clone(&chain), GatewayConfig::default());
    assert_eq!(runtime.task_count(), 4);

    wait_until_alive(&runtime).await;

    let ctx = runtime
        .gateway()
        .build_request_context(&"eth".into(), &RequestMetadata::default())
        .await
        .expect("endpoints available");
    assert_eq!(ctx.available_endpoints().len(), 3);

    runtime.shutdown().await;
    assert_eq!(runtime.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_picks_up_new_sessions() {
    let chain = eth_scenario();
    let runtime = build_runtime(Arc::clone(&chain), GatewayConfig::default());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(chain.app_calls.load(Ordering::SeqCst), 1);

    chain.insert_session(create_test_session(
        "eth",
        "app1",
        "eth-session-2",
        &[("supplier-d", "https://d.example")],
    ));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(chain.app_calls.load(Ordering::SeqCst), 2);

    let endpoints = runtime.gateway().cache().get_service_endpoints(&"eth".into(), &RequestMetadata::default());
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints.values().next().map(|e| e.supplier()), Some("supplier-d"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let runtime = build_runtime(eth_scenario(), GatewayConfig::default());

    runtime.shutdown().await;
    timeout(Duration::from_secs(1), runtime.shutdown())
        .await
        .expect("second shutdown returns immediately");
    assert!(runtime.is_shutdown());
}

#[tokio::test]
async fn test_shutdown_signal_broadcast_to_all_receivers() {
    let runtime = build_runtime(eth_scenario(), GatewayConfig::default());
    let received_count = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let mut rx = runtime.shutdown_receiver();
            let count = Arc::clone(&received_count);
            tokio::spawn(async move {
                if rx.recv().await.is_ok() {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    runtime.shutdown().await;

    for task in tasks {
        timeout(Duration::from_secs(2), task)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }
    assert_eq!(received_count.load(Ordering::SeqCst), 3, "All 3 receivers should have been notified");
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let mut config = GatewayConfig::default();
    config.cache_manager.session_workers = 0;

    let result = GatewayRuntime::builder()
        .with_config(config)
        .with_chain_client(eth_scenario())
        .with_signer(Arc::new(MockSigner::new()))
        .build();
    assert!(matches!(result, Err(RuntimeError::ConfigValidation(_))));
}

#[tokio::test]
async fn test_disabled_signature_cache_has_no_sweeper() {
    let mut config = GatewayConfig::default();
    config.signature_cache.enabled = false;

    let runtime = build_runtime(eth_scenario(), config);
    assert_eq!(runtime.task_count(), 3);
    assert!(!runtime.gateway().signature_cache().is_enabled());
    runtime.shutdown().await;
}
