//! Dispatch over the real HTTP transport against mockito servers.

use crate::mock_infrastructure::{create_test_app, create_test_session, MockChain, MockSigner, PrefixSelector};
use relay_core::{
    config::GatewayConfig,
    protocol::{Gateway, Protocol, RequestMetadata, ServiceFallback},
    relay::{ContextState, EndpointErrorKind, HttpRelayTransport, RelayError},
    types::{RelayPayload, ServiceId},
};
use std::sync::Arc;

fn chain_with_supplier(url: &str) -> Arc<MockChain> {
    let chain = Arc::new(MockChain::new());
    chain.set_apps(vec![create_test_app("app1", &["eth"])]);
    chain.insert_session(create_test_session("eth", "app1", "s1", &[("supplier-a", url)]));
    chain
}

fn gateway(config: &GatewayConfig, chain: &Arc<MockChain>) -> Gateway<MockChain> {
    let transport = HttpRelayTransport::with_config(&config.transport).expect("transport builds");
    Gateway::new(config, Arc::clone(chain), Arc::new(MockSigner::new()), Arc::new(transport))
}

#[tokio::test]
async fn test_signed_relay_posted_to_supplier() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Regex("\"signature\"".to_string()))
        .with_status(200)
        .with_body(r#"{"relay":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let chain = chain_with_supplier(&server.url());
    let gateway = gateway(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();

    let mut ctx = gateway.build_request_context(&ServiceId::from("eth"), &RequestMetadata::default()).await.unwrap();
    ctx.select_endpoint(&PrefixSelector("supplier-a")).unwrap();
    let response = ctx.dispatch(RelayPayload::json_rpc(r#"{"id":1}"#)).await.unwrap();

    assert_eq!(response.bytes.as_ref(), br#"{"relay":"ok"}"#);
    assert_eq!(ctx.state(), ContextState::Completed);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_error_sanctions_supplier() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/").with_status(503).with_body("overloaded").create_async().await;

    let chain = chain_with_supplier(&server.url());
    let gateway = gateway(&GatewayConfig::default(), &chain);
    gateway.cache().refresh().await.unwrap();

    let mut ctx = gateway.build_request_context(&ServiceId::from("eth"), &RequestMetadata::default()).await.unwrap();
    ctx.select_endpoint(&PrefixSelector("supplier-a")).unwrap();
    let err = ctx.dispatch(RelayPayload::json_rpc("{}")).await.unwrap_err();
    assert!(matches!(err, RelayError::Transport(_)));
    assert!(matches!(ctx.state(), ContextState::Failed(kind) if kind != EndpointErrorKind::Internal));

    gateway.apply_observations(ctx.observations()).await.unwrap();
    assert!(gateway.build_request_context(&ServiceId::from("eth"), &RequestMetadata::default()).await.is_err());
}

#[tokio::test]
async fn test_send_all_traffic_posts_raw_payload_to_fallback() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":7}"#)
        .with_status(200)
        .with_body(r#"{"result":"0x10"}"#)
        .create_async()
        .await;

    let chain = chain_with_supplier("https://unused.example");
    let mut config = GatewayConfig::default();
    config.protocol.service_fallbacks = vec![ServiceFallback {
        service_id: "eth".into(),
        send_all_traffic: true,
        fallback_urls: vec![format!("{}/", server.url())],
    }];
    let gateway = gateway(&config, &chain);
    gateway.cache().refresh().await.unwrap();

    let mut ctx = gateway.build_request_context(&ServiceId::from("eth"), &RequestMetadata::default()).await.unwrap();
    ctx.select_endpoint(&PrefixSelector("fallback")).unwrap();
    let response = ctx
        .dispatch(RelayPayload::json_rpc(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":7}"#))
        .await
        .unwrap();

    assert_eq!(response.bytes.as_ref(), br#"{"result":"0x10"}"#);
    mock.assert_async().await;
}
