//! End-to-end endpoint lifecycle through the protocol facade.
//!
//! Each test drives a [`Gateway`] over the mock chain: refresh the cache, build a request
//! context, select and dispatch, then feed observations back and check how the next
//! context changes.

use crate::mock_infrastructure::{
    create_test_app, create_test_session, eth_scenario, MockChain, MockSigner, MockTransport, PrefixSelector,
};
use chrono::Utc;
use relay_core::{
    config::GatewayConfig,
    protocol::{Gateway, HealthCheck, Protocol, ProtocolError, RequestMetadata, ServiceFallback},
    relay::{ContextState, EndpointErrorKind, EndpointObservation, RelayError, RequestObservations, TransportError},
    sanction::SanctionType,
    types::{EndpointAddr, RelayPayload, ServiceId},
};
use std::{sync::Arc, time::Duration};

fn gateway_with(
    config: &GatewayConfig,
    chain: &Arc<MockChain>,
) -> (Gateway<MockChain>, Arc<MockSigner>, Arc<MockTransport>) {
    let signer = Arc::new(MockSigner::new());
    let transport = Arc::new(MockTransport::new());
    let gateway = Gateway::new(config, Arc::clone(chain), signer.clone(), transport.clone());
    (gateway, signer, transport)
}

fn eth() -> ServiceId {
    ServiceId::from("eth")
}

fn addr_of(supplier: &str) -> EndpointAddr {
    let host = supplier.trim_start_matches("supplier-");
    EndpointAddr::new(supplier, &format!("https://{host}.example"))
}

async fn sanction_permanently(gateway: &Gateway<MockChain>, supplier: &str) {
    let endpoints = gateway.cache().get_service_endpoints(&eth(), &RequestMetadata::default());
    let endpoint = &endpoints[&addr_of(supplier)];

    let mut observations = RequestObservations::new(uuid::Uuid::new_v4(), eth());
    observations.endpoint_observations.push(EndpointObservation::failure(
        endpoint,
        endpoint.url(),
        Utc::now(),
        EndpointErrorKind::Misconfigured,
        "serving a different chain".to_string(),
        SanctionType::Permanent,
    ));
    gateway.apply_observations(&observations).await.unwrap();
}

#[tokio::test]
async fn test_permanently_sanctioned_endpoint_never_selected() {
    let chain = eth_scenario();
    let (gateway, signer, transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();
    assert!(gateway.is_alive());

    sanction_permanently(&gateway, "supplier-a").await;

    for _ in 0..3 {
        let mut ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
        assert!(!ctx.available_endpoints().contains(&addr_of("supplier-a")));
        assert_eq!(ctx.available_endpoints().len(), 2);

        // Asking for A explicitly still lands elsewhere.
        let selected = ctx.select_endpoint(&PrefixSelector("supplier-a")).unwrap().addr().clone();
        assert_ne!(selected, addr_of("supplier-a"));

        let response = ctx.dispatch(RelayPayload::json_rpc(r#"{"id":1}"#)).await.unwrap();
        assert_eq!(response.endpoint_addr, selected);
        assert_eq!(ctx.state(), ContextState::Completed);
        gateway.apply_observations(ctx.observations()).await.unwrap();
    }

    assert!(transport.urls().iter().all(|url| !url.starts_with("https://a.example")));
    assert_eq!(signer.calls(), 1, "identical payloads reuse the cached signature");

    let details = gateway.sanction_details(&eth()).await;
    assert_eq!(details.total_endpoints, 3);
    assert_eq!(details.valid_endpoints, 2);
    assert_eq!(details.sanctions.permanent_count, 1);
    assert_eq!(details.sanctions.session_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_sanctions_for_session_only() {
    let chain = eth_scenario();
    let (gateway, _signer, transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();
    transport.delay("https://b.example", Duration::from_secs(5));

    let mut ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
    ctx.select_endpoint(&PrefixSelector("supplier-b")).unwrap();
    let err = ctx
        .dispatch(RelayPayload::json_rpc(r#"{"id":2}"#).with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Timeout));
    assert_eq!(ctx.state(), ContextState::Failed(EndpointErrorKind::Timeout));

    let observations = ctx.into_observations();
    assert_eq!(
        observations.endpoint_observations[0].recommended_sanction,
        Some(SanctionType::Session)
    );
    gateway.apply_observations(&observations).await.unwrap();

    let ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
    assert_eq!(ctx.available_endpoints(), vec![addr_of("supplier-a"), addr_of("supplier-c")]);

    // A new session for the same app brings B back.
    chain.insert_session(create_test_session(
        "eth",
        "app1",
        "eth-session-2",
        &[("supplier-b", "https://b.example")],
    ));
    gateway.cache().refresh().await.unwrap();
    let ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
    assert_eq!(ctx.available_endpoints(), vec![addr_of("supplier-b")]);
}

#[tokio::test(start_paused = true)]
async fn test_session_sanction_expires() {
    let chain = eth_scenario();
    let (gateway, _signer, transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();
    transport.fail("https://c.example", TransportError::Connection("refused".to_string()));

    let mut ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
    ctx.select_endpoint(&PrefixSelector("supplier-c")).unwrap();
    assert!(ctx.dispatch(RelayPayload::json_rpc("{}")).await.is_err());
    gateway.apply_observations(ctx.observations()).await.unwrap();
    assert_eq!(gateway.sanction_details(&eth()).await.valid_endpoints, 2);

    tokio::time::advance(Duration::from_secs(61 * 60)).await;
    assert_eq!(gateway.sanction_details(&eth()).await.valid_endpoints, 3);
}

#[tokio::test]
async fn test_all_sanctioned_without_fallback() {
    let chain = eth_scenario();
    let (gateway, _signer, _transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();

    for supplier in ["supplier-a", "supplier-b", "supplier-c"] {
        sanction_permanently(&gateway, supplier).await;
    }

    let err = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::NoEndpoints(service) if service == eth()));
}

#[tokio::test]
async fn test_rollover_uses_fallback() {
    let chain = eth_scenario();
    let mut config = GatewayConfig::default();
    config.protocol.service_fallbacks = vec![ServiceFallback {
        service_id: eth(),
        send_all_traffic: false,
        fallback_urls: vec!["https://fallback.example".to_string()],
    }];
    config.relay.rollover_fallback_wait_ms = 50;

    let (gateway, _signer, transport) = gateway_with(&config, &chain);
    gateway.cache().refresh().await.unwrap();
    transport.delay("https://a.example", Duration::from_secs(2));

    chain.set_block_height(165);
    gateway.rollover().poll_once().await.unwrap();
    assert!(gateway.rollover().is_in_rollover());

    let mut ctx = gateway.build_request_context(&eth(), &RequestMetadata::default()).await.unwrap();
    assert!(ctx.is_in_rollover());
    ctx.select_endpoint(&PrefixSelector("supplier-a")).unwrap();
    let response = ctx.dispatch(RelayPayload::json_rpc(r#"{"id":3}"#)).await.unwrap();

    assert!(response.endpoint_addr.as_str().starts_with("fallback-"));
    assert_eq!(response.bytes.as_ref(), br#"{"id":3}"#);
    assert_eq!(ctx.observations().endpoint_observations.len(), 2);
    assert_eq!(transport.urls().last().map(String::as_str), Some("https://fallback.example"));
}

#[tokio::test]
async fn test_app_filter_and_configured_services() {
    let chain = eth_scenario();
    chain.set_apps(vec![create_test_app("app1", &["eth"]), create_test_app("app2", &["eth", "base"])]);
    chain.insert_session(create_test_session("eth", "app2", "eth-session-9", &[("supplier-z", "https://z.example")]));
    chain.insert_session(create_test_session("base", "app2", "base-session-1", &[("supplier-y", "https://y.example")]));

    let (gateway, _signer, _transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();

    assert_eq!(gateway.configured_service_ids(), vec![ServiceId::from("base"), eth()]);

    let metadata = RequestMetadata { app_address: Some("app2".to_string()), target_supplier: None };
    let ctx = gateway.build_request_context(&eth(), &metadata).await.unwrap();
    assert_eq!(ctx.available_endpoints(), vec![EndpointAddr::new("supplier-z", "https://z.example")]);
}

#[tokio::test]
async fn test_unhealthy_client_reports_not_alive() {
    let chain = eth_scenario();
    let (gateway, _signer, _transport) = gateway_with(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();
    assert!(gateway.is_alive());

    chain.set_healthy(false);
    assert!(!gateway.is_alive());
    assert_eq!(gateway.name(), "shannon");
}
