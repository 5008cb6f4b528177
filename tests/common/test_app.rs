//! Test application setup utilities
//!
//! Provides utilities for setting up test instances of the application
//! with throwaway SQLite databases and an in-memory metrics recorder.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{body::Body, extract::ConnectInfo, http::Request, Router};
use tower::ServiceExt;
use uuid::Uuid;

use tihomo_identity::{
    api,
    config::{
        ApiKeysConfig, AppConfig, AuthConfig, CountersConfig, DatabaseConfig, LoggingConfig,
        ServerConfig,
    },
    db,
    middleware::auth::create_access_token,
    models::User,
    services::{
        key_codec::{DEFAULT_MAX_KEY_BODY_LENGTH, DEFAULT_PREFIX_DISPLAY_CHARS},
        ApiKeyVerifier, AuthService, InMemoryMetricsRecorder, KeyCodec, MemoryCounterStore,
    },
    AppState,
};

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub metrics: Arc<InMemoryMetricsRecorder>,
}

impl TestApp {
    /// Create a new test application over a throwaway SQLite database
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create a new test application with custom configuration
    pub async fn with_config(config: AppConfig) -> Self {
        let db = db::init_pool(&config.database)
            .await
            .expect("Failed to initialize test database");

        let codec = KeyCodec::new(
            config.api_keys.key_prefix.clone(),
            DEFAULT_MAX_KEY_BODY_LENGTH,
            DEFAULT_PREFIX_DISPLAY_CHARS,
        );
        let counters: Arc<dyn tihomo_identity::services::CounterStore> =
            Arc::new(MemoryCounterStore::new(config.counters.max_entries));
        let metrics = Arc::new(InMemoryMetricsRecorder::new());
        let metrics_dyn: Arc<dyn tihomo_identity::services::MetricsRecorder> = metrics.clone();

        let verifier = ApiKeyVerifier::new(
            db.clone(),
            codec,
            counters.clone(),
            metrics_dyn.clone(),
            config.api_keys.clone(),
        );

        let state = AppState {
            config,
            db,
            verifier,
            counters,
            metrics: metrics_dyn,
        };

        let router = Router::new()
            .nest("/api/v1", api::public_routes())
            .nest(
                "/api/v1",
                api::protected_routes().layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    tihomo_identity::middleware::auth::auth_middleware,
                )),
            )
            .with_state(state.clone());

        Self {
            router,
            state,
            metrics,
        }
    }

    /// Insert a user directly and return it
    pub async fn seed_user(&self, email: &str, password: &str) -> User {
        AuthService::new(self.state.db.clone())
            .create_user(email, password, "Test User")
            .await
            .expect("Failed to seed test user")
    }

    /// Mint a session token the way login would
    pub fn token_for(&self, user: &User) -> String {
        create_access_token(
            &user.id,
            &user.email,
            &self.state.config.auth.jwt_secret,
            self.state.config.auth.token_expiry_hours,
        )
        .expect("Failed to generate test token")
    }

    /// Seed a user and create one API key for them, returning the plaintext
    /// key alongside its id
    pub async fn seed_user_with_key(&self, email: &str) -> (User, String, Uuid) {
        let user = self.seed_user(email, "password123").await;
        let response = self
            .state
            .verifier
            .create_key(
                user.id,
                serde_json::from_value(serde_json::json!({"name": "seeded key"}))
                    .expect("Invalid key request"),
            )
            .await
            .expect("Failed to seed API key");
        let id = response.api_key.id;
        (user, response.key, id)
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make a GET request with a bearer token
    pub async fn get_auth(&self, uri: &str, token: &str) -> TestResponse {
        self.request_with_auth(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
            token,
        )
        .await
    }

    /// Make a POST request with JSON body
    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with JSON body and a bearer token
    pub async fn post_json_auth(
        &self,
        uri: &str,
        body: serde_json::Value,
        token: &str,
    ) -> TestResponse {
        self.request_with_auth(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            token,
        )
        .await
    }

    /// Make a PUT request with JSON body and a bearer token
    pub async fn put_json_auth(
        &self,
        uri: &str,
        body: serde_json::Value,
        token: &str,
    ) -> TestResponse {
        self.request_with_auth(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            token,
        )
        .await
    }

    /// Make a DELETE request with a bearer token
    pub async fn delete_auth(&self, uri: &str, token: &str) -> TestResponse {
        self.request_with_auth(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
            token,
        )
        .await
    }

    /// Make a request with authentication
    pub async fn request_with_auth(&self, request: Request<Body>, token: &str) -> TestResponse {
        let (mut parts, body) = request.into_parts();
        parts.headers.insert(
            "Authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        self.request(Request::from_parts(parts, body)).await
    }

    /// Make an arbitrary request
    ///
    /// A fake peer address is injected so handlers using `ConnectInfo` work
    /// under `oneshot`.
    pub async fn request(&self, mut request: Request<Body>) -> TestResponse {
        let addr: SocketAddr = "127.0.0.1:54321".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// Check if the response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    /// Assert the response status is Created (201)
    pub fn assert_created(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::CREATED)
    }

    /// Assert the response status is No Content (204)
    pub fn assert_no_content(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::NO_CONTENT)
    }

    /// Assert the response status is Unauthorized (401)
    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }

    /// Assert the response status is Not Found (404)
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::NOT_FOUND)
    }
}

/// Create a test configuration with a throwaway SQLite database
pub fn test_config() -> AppConfig {
    // Use a unique temp file for each test to avoid conflicts
    let db_path = format!(
        "/tmp/tihomo_identity_test_{}.db",
        Uuid::new_v4().to_string().replace('-', "")
    );

    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000, // Test port
            workers: 1,
            request_timeout_secs: None,
            tls: None,
        },
        database: DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", db_path),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        },
        auth: AuthConfig {
            jwt_secret: "test_secret_key_that_is_at_least_32_bytes_long".to_string(),
            token_expiry_hours: 24,
            exchange_token_expiry_minutes: 15,
            password_min_length: 8,
            bootstrap_admin: None,
        },
        logging: LoggingConfig::default(),
        api_keys: ApiKeysConfig::default(),
        counters: CountersConfig::default(),
        gateway: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_creation() {
        let app = TestApp::new().await;
        assert!(app.state.config.gateway.is_none());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = TestApp::new().await;
        let response = app.get("/api/v1/health").await;
        response.assert_ok();
    }

    #[tokio::test]
    async fn test_response_json_parsing() {
        let app = TestApp::new().await;
        let response = app.get("/api/v1/health").await;
        let json: serde_json::Value = response.json();
        assert!(json.get("status").is_some());
    }
}
