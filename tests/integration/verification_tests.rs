//! Verification endpoint integration tests
//!
//! Exercises the ordered verification checks through POST /api-keys/verify.

use axum::{body::Body, http::Request};
use chrono::{Duration, Utc};

use tihomo_identity::db::UserRepository;
use tihomo_identity::models::UpdateApiKeyRequest;

use crate::common::{TestApp, UserFactory};

async fn verify(app: &TestApp, raw_key: &str) -> serde_json::Value {
    let response = app
        .post_json(
            "/api/v1/api-keys/verify",
            serde_json::json!({ "apiKey": raw_key }),
        )
        .await;
    response.assert_ok();
    response.json()
}

#[tokio::test]
async fn test_valid_key_verifies() {
    let app = TestApp::new().await;
    let (user, raw_key, id) = app.seed_user_with_key(&UserFactory::new().email()).await;

    let verdict = verify(&app, &raw_key).await;

    assert_eq!(verdict["isValid"], true);
    assert_eq!(verdict["userId"], user.id.to_string());
    assert_eq!(verdict["apiKeyId"], id.to_string());
    assert_eq!(verdict["userEmail"], user.email);
    assert_eq!(verdict["message"], "API key is valid");
}

#[tokio::test]
async fn test_malformed_key_fails_format_check() {
    let app = TestApp::new().await;

    let verdict = verify(&app, "sk_live_nope").await;

    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "Invalid API key format");
    assert!(verdict.get("userId").is_none());
}

#[tokio::test]
async fn test_unknown_key_fails_lookup() {
    let app = TestApp::new().await;

    let verdict = verify(&app, "tihomo_doesnotexistanywhere0000000000000000000").await;

    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "API key not found");
}

#[tokio::test]
async fn test_expired_key_fails() {
    let app = TestApp::new().await;
    let (_, raw_key, id) = app.seed_user_with_key(&UserFactory::new().email()).await;

    let update = UpdateApiKeyRequest {
        name: None,
        description: None,
        scopes: None,
        rate_limit_per_minute: None,
        daily_usage_quota: None,
        ip_whitelist: None,
        security_settings: None,
        expires_at: Some(Utc::now() - Duration::hours(1)),
    };
    app.state
        .verifier
        .update_key(id, update)
        .await
        .expect("Failed to backdate expiry");

    let verdict = verify(&app, &raw_key).await;

    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "API key has expired");
}

#[tokio::test]
async fn test_disabled_owner_fails() {
    let app = TestApp::new().await;
    let (user, raw_key, _) = app.seed_user_with_key(&UserFactory::new().email()).await;

    UserRepository::new(&app.state.db)
        .set_active(user.id, false)
        .await
        .expect("Failed to disable user");

    let verdict = verify(&app, &raw_key).await;

    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "User account is disabled or not found");
}

#[tokio::test]
async fn test_ip_outside_whitelist_fails() {
    let app = TestApp::new().await;
    let (_, raw_key, id) = app.seed_user_with_key(&UserFactory::new().email()).await;

    let update = UpdateApiKeyRequest {
        name: None,
        description: None,
        scopes: None,
        rate_limit_per_minute: None,
        daily_usage_quota: None,
        ip_whitelist: Some(vec!["10.0.0.0/8".to_string()]),
        security_settings: None,
        expires_at: None,
    };
    app.state
        .verifier
        .update_key(id, update)
        .await
        .expect("Failed to set whitelist");

    // Caller presents as 203.0.113.7 via proxy header, outside 10.0.0.0/8
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/api-keys/verify")
        .header("Content-Type", "application/json")
        .header("X-Forwarded-For", "203.0.113.7")
        .body(Body::from(
            serde_json::json!({ "apiKey": raw_key }).to_string(),
        ))
        .unwrap();
    let response = app.request(request).await;

    response.assert_ok();
    let verdict: serde_json::Value = response.json();
    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "IP address not allowed");
}

#[tokio::test]
async fn test_ip_inside_whitelist_passes() {
    let app = TestApp::new().await;
    let (_, raw_key, id) = app.seed_user_with_key(&UserFactory::new().email()).await;

    let update = UpdateApiKeyRequest {
        name: None,
        description: None,
        scopes: None,
        rate_limit_per_minute: None,
        daily_usage_quota: None,
        ip_whitelist: Some(vec!["10.0.0.0/8".to_string()]),
        security_settings: None,
        expires_at: None,
    };
    app.state.verifier.update_key(id, update).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/api-keys/verify")
        .header("Content-Type", "application/json")
        .header("X-Forwarded-For", "10.1.2.3")
        .body(Body::from(
            serde_json::json!({ "apiKey": raw_key }).to_string(),
        ))
        .unwrap();
    let response = app.request(request).await;

    response.assert_ok();
    let verdict: serde_json::Value = response.json();
    assert_eq!(verdict["isValid"], true);
}

#[tokio::test]
async fn test_rate_limit_trips_on_boundary() {
    let app = TestApp::new().await;
    let (_, raw_key, id) = app.seed_user_with_key(&UserFactory::new().email()).await;

    let update = UpdateApiKeyRequest {
        name: None,
        description: None,
        scopes: None,
        rate_limit_per_minute: Some(2),
        daily_usage_quota: None,
        ip_whitelist: None,
        security_settings: None,
        expires_at: None,
    };
    app.state.verifier.update_key(id, update).await.unwrap();

    // Two successes fill the minute window, the third hits count >= limit
    assert_eq!(verify(&app, &raw_key).await["isValid"], true);
    assert_eq!(verify(&app, &raw_key).await["isValid"], true);

    let verdict = verify(&app, &raw_key).await;
    assert_eq!(verdict["isValid"], false);
    assert_eq!(verdict["message"], "Rate limit exceeded");
}

#[tokio::test]
async fn test_analytics_opt_out_skips_usage_logging() {
    let app = TestApp::new().await;
    let user = app.seed_user(&UserFactory::new().email(), "Sup3rSecret!").await;
    let token = app.token_for(&user);

    let create = app
        .post_json_auth(
            "/api/v1/api-keys",
            serde_json::json!({
                "name": "quiet key",
                "securitySettings": { "enableUsageAnalytics": false },
            }),
            &token,
        )
        .await;
    create.assert_created();
    let body: serde_json::Value = create.json();
    let raw_key = body["key"].as_str().unwrap().to_string();
    let key_id = body["id"].as_str().unwrap().to_string();

    let verdict = verify(&app, &raw_key).await;
    assert_eq!(verdict["isValid"], true);

    let analytics = app
        .get_auth(&format!("/api/v1/api-keys/{}/analytics", key_id), &token)
        .await;
    analytics.assert_ok();
    let stats: serde_json::Value = analytics.json();
    assert_eq!(stats["totalRequests"], 0);
}

#[tokio::test]
async fn test_verification_metrics_are_recorded() {
    let app = TestApp::new().await;
    let (_, raw_key, _) = app.seed_user_with_key(&UserFactory::new().email()).await;

    verify(&app, &raw_key).await;
    verify(&app, "tihomo_bogusbogusbogus").await;

    assert_eq!(app.metrics.verifications(), 2);
    assert!(app
        .metrics
        .failure_reasons()
        .contains(&"API key not found".to_string()));
}
