//! Discovery and tool-call tests over real sockets.
//!
//! The registry points at wiremock instances; health probes and RPC
//! envelopes both travel over HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deskrelay_common::resilience::{ResilienceError, RetryConfig};
use deskrelay_infra::rpc::ToolCallClient;
use deskrelay_infra::{InfraError, ServiceRegistry};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_registry(dir: &Path, endpoints: &[(&str, u16)]) -> PathBuf {
    let list: Vec<serde_json::Value> = endpoints
        .iter()
        .map(|(host, port)| json!({"host": host, "port": port}))
        .collect();
    let body = json!({"services": {"customer_service": {"endpoints": list}}});
    let registry_path = dir.join("service_registry.json");
    std::fs::write(&registry_path, body.to_string()).expect("write registry");
    registry_path
}

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;
    server
}

fn fast_retry() -> RetryConfig {
    RetryConfig::builder()
        .max_retries(0)
        .base_delay(std::time::Duration::from_millis(1))
        .build()
        .unwrap()
}

/// Validates endpoint selection order: the dead instance listed first
/// is skipped and the healthy one answers the tool call.
#[tokio::test]
async fn test_discovery_skips_dead_instance() {
    let server = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "handle_customer_query"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"success": true, "response": "Password reset link sent"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    // Port 9 is the discard port, nothing listens there.
    let registry_path = write_registry(
        dir.path(),
        &[("127.0.0.1", 9), ("127.0.0.1", server.address().port())],
    );

    let registry = Arc::new(ServiceRegistry::open(&registry_path).expect("open"));
    let client = ToolCallClient::with_retry(registry, fast_retry()).expect("client");

    let result = client
        .call_tool(
            "customer_service",
            "handle_customer_query",
            json!({"query": "reset my password", "customer_id": "cust-1"}),
        )
        .await
        .expect("tool call succeeds");

    assert_eq!(result["success"], true);
    assert_eq!(result["response"], "Password reset link sent");
}

/// Validates the bearer token reaches the wire.
#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .and(header("authorization", "Bearer demo-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"success": true}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let registry_path = write_registry(dir.path(), &[("127.0.0.1", server.address().port())]);
    let registry = Arc::new(ServiceRegistry::open(&registry_path).expect("open"));
    let client = ToolCallClient::with_retry(registry, fast_retry())
        .expect("client")
        .with_bearer_token("demo-token");

    client
        .call_tool("customer_service", "lookup_customer", json!({"customer_id": "cust-1"}))
        .await
        .expect("tool call succeeds");
}

/// Validates that an RPC-level error envelope surfaces as an RPC error
/// after the retry budget, not as a transport failure.
#[tokio::test]
async fn test_rpc_error_envelope_surfaces() {
    let server = healthy_server().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32601, "message": "method not found"}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let registry_path = write_registry(dir.path(), &[("127.0.0.1", server.address().port())]);
    let registry = Arc::new(ServiceRegistry::open(&registry_path).expect("open"));
    let client = ToolCallClient::with_retry(registry, fast_retry()).expect("client");

    let result = client.call_tool("customer_service", "unknown_tool", json!({})).await;
    assert!(matches!(
        result,
        Err(ResilienceError::RetriesExhausted {
            attempts: 1,
            source: InfraError::Rpc { code: -32601, .. }
        })
    ));
}

/// Validates the no-healthy-endpoint outcome when every probe fails.
#[tokio::test]
async fn test_no_healthy_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let registry_path = write_registry(dir.path(), &[("127.0.0.1", server.address().port())]);
    let registry = Arc::new(ServiceRegistry::open(&registry_path).expect("open"));
    let client = ToolCallClient::with_retry(registry, fast_retry()).expect("client");

    let result = client.call_tool("customer_service", "handle_customer_query", json!({})).await;
    assert!(matches!(
        result,
        Err(ResilienceError::RetriesExhausted {
            attempts: 1,
            source: InfraError::NoHealthyEndpoint { .. }
        })
    ));
}

/// Validates that runtime registrations in the active-services file
/// take precedence over the static registry.
#[tokio::test]
async fn test_active_services_take_precedence() {
    let registered = healthy_server().await;
    let stale = healthy_server().await;

    let dir = tempfile::tempdir().expect("tempdir");
    let registry_path =
        write_registry(dir.path(), &[("127.0.0.1", stale.address().port())]);
    std::fs::write(
        dir.path().join("active_services.json"),
        json!({"services": [
            {"host": "127.0.0.1", "port": registered.address().port()}
        ]})
        .to_string(),
    )
    .expect("write active file");

    let registry = ServiceRegistry::open(&registry_path).expect("open");
    let url = registry.discover("customer_service").await.expect("healthy endpoint");
    assert_eq!(url, format!("http://127.0.0.1:{}/rpc", registered.address().port()));
}
