//! Gateway exchange middleware integration tests
//!
//! Mounts the gateway layer in front of an echo handler and points its
//! exchange client at a wiremock server standing in for the identity
//! service.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use tihomo_identity::config::GatewayConfig;
use tihomo_identity::middleware::{gateway_exchange_middleware, GatewayState};
use tihomo_identity::services::InMemoryMetricsRecorder;

/// Downstream handler that reports back the auth headers it received
async fn echo_headers(headers: HeaderMap) -> Json<serde_json::Value> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let api_key = headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    Json(json!({ "authorization": authorization, "apiKey": api_key }))
}

struct GatewayHarness {
    router: Router,
    metrics: Arc<InMemoryMetricsRecorder>,
}

impl GatewayHarness {
    fn new(exchange_url: String) -> Self {
        let config = GatewayConfig {
            exchange_url,
            exchange_timeout_secs: 5,
            api_key_header: "X-API-Key".to_string(),
            skip_paths: vec!["/api/v1/health".to_string()],
            processed_paths: vec!["/api/v1".to_string()],
        };
        let metrics = Arc::new(InMemoryMetricsRecorder::new());
        let state = GatewayState::new(config, metrics.clone())
            .expect("Failed to build gateway state");

        let router = Router::new()
            .route("/api/v1/accounts", get(echo_headers))
            .route("/api/v1/health", get(echo_headers))
            .route("/internal/debug", get(echo_headers))
            .layer(middleware::from_fn_with_state(
                state,
                gateway_exchange_middleware,
            ));

        Self { router, metrics }
    }

    async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }
}

fn exchange_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "accessToken": token,
        "expiresAt": "2026-01-01T00:00:00Z",
        "tokenType": "Bearer",
        "userId": "5f2b7c3e-1111-2222-3333-444455556666",
        "userEmail": "owner@example.com",
    }))
}

#[tokio::test]
async fn test_request_without_key_passes_through() {
    let server = MockServer::start().await;
    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));

    let (status, body) = harness.get("/api/v1/accounts", &[]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiKey"], serde_json::Value::Null);
    assert_eq!(harness.metrics.requests_without_key(), 1);
}

#[tokio::test]
async fn test_successful_exchange_swaps_key_for_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .and(body_json(json!("tihomo_goodkey")))
        .respond_with(exchange_response("minted.jwt.token"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));
    let (status, body) = harness
        .get("/api/v1/accounts", &[("X-API-Key", "tihomo_goodkey")])
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorization"], "Bearer minted.jwt.token");
    assert_eq!(body["apiKey"], serde_json::Value::Null);
    assert_eq!(harness.metrics.exchange_successes(), 1);
}

#[tokio::test]
async fn test_legacy_bearer_key_is_exchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .and(body_json(json!("tihomo_legacykey")))
        .respond_with(exchange_response("fresh.jwt.token"))
        .mount(&server)
        .await;

    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));
    let (status, body) = harness
        .get(
            "/api/v1/accounts",
            &[("Authorization", "Bearer tihomo_legacykey")],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorization"], "Bearer fresh.jwt.token");
}

#[tokio::test]
async fn test_failed_exchange_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/exchange"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));
    let (status, body) = harness
        .get("/api/v1/accounts", &[("X-API-Key", "tihomo_badkey")])
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication failed");
    assert_eq!(body["path"], "/api/v1/accounts");
    assert!(body["timestamp"].as_str().is_some());
    assert_eq!(harness.metrics.exchange_failures(), 1);
}

#[tokio::test]
async fn test_skip_path_bypasses_exchange() {
    let server = MockServer::start().await;
    // No mock mounted; an exchange attempt would fail the request
    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));

    let (status, body) = harness
        .get("/api/v1/health", &[("X-API-Key", "tihomo_anykey")])
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiKey"], "tihomo_anykey");
}

#[tokio::test]
async fn test_unprocessed_path_bypasses_exchange() {
    let server = MockServer::start().await;
    let harness = GatewayHarness::new(format!("{}/exchange", server.uri()));

    let (status, _) = harness
        .get("/internal/debug", &[("X-API-Key", "tihomo_anykey")])
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.metrics.requests_without_key(), 0);
}
