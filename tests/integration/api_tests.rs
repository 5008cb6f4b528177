//! General API integration tests
//!
//! Health endpoints, auth flow, and cross-cutting middleware behavior.

use crate::common::{TestApp, UserFactory};

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health").await;

    response.assert_ok();

    let json: serde_json::Value = response.json();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_detailed_health_endpoint() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health/detailed").await;

    response.assert_ok();

    let json: serde_json::Value = response.json();
    assert!(json.get("status").is_some());
    assert!(json.get("components").is_some());
    assert!(json["components"].get("database").is_some());
    assert!(json["components"].get("counter_store").is_some());
}

#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health/live").await;

    response.assert_ok();
}

#[tokio::test]
async fn test_readiness_probe() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/health/ready").await;

    response.assert_ok();
}

#[tokio::test]
async fn test_login_returns_token() {
    let app = TestApp::new().await;
    let email = UserFactory::new().email();
    app.seed_user(&email, "password123").await;

    let response = app
        .post_json(
            "/api/v1/auth/login",
            serde_json::json!({ "email": email, "password": "password123" }),
        )
        .await;

    response.assert_ok();
    let json: serde_json::Value = response.json();
    assert!(json["accessToken"].as_str().is_some());
    assert_eq!(json["tokenType"], "Bearer");
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    let email = UserFactory::new().email();
    app.seed_user(&email, "password123").await;

    let response = app
        .post_json(
            "/api/v1/auth/login",
            serde_json::json!({ "email": email, "password": "wrong" }),
        )
        .await;

    response.assert_unauthorized();
}

#[tokio::test]
async fn test_me_requires_token() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/auth/me").await;

    response.assert_unauthorized();
}

#[tokio::test]
async fn test_me_returns_current_user() {
    let app = TestApp::new().await;
    let email = UserFactory::new().email();
    let user = app.seed_user(&email, "password123").await;
    let token = app.token_for(&user);

    let response = app.get_auth("/api/v1/auth/me", &token).await;

    response.assert_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["email"], email);
    assert!(json.get("passwordHash").is_none());
}

#[tokio::test]
async fn test_protected_route_rejects_garbage_token() {
    let app = TestApp::new().await;
    let response = app.get_auth("/api/v1/api-keys", "not-a-jwt").await;

    response.assert_unauthorized();
}
