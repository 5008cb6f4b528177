//! Test world for Cucumber scenarios

use std::fmt;
use std::sync::Arc;

use cucumber::World;
use uuid::Uuid;

use tihomo_identity::{
    config::{ApiKeysConfig, DatabaseConfig},
    db,
    models::{CreateApiKeyRequest, User, VerificationResult},
    services::{
        key_codec::{DEFAULT_MAX_KEY_BODY_LENGTH, DEFAULT_PREFIX_DISPLAY_CHARS},
        ApiKeyVerifier, AuthService, InMemoryMetricsRecorder, KeyCodec, MemoryCounterStore,
    },
};

/// Wrapper so the verifier (which holds trait objects) can live in a
/// `#[derive(Debug)]` world
pub struct VerifierHandle(pub ApiKeyVerifier);

impl fmt::Debug for VerifierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKeyVerifier")
    }
}

/// Test world that maintains state across scenario steps
#[derive(Debug, Default, World)]
pub struct TestWorld {
    /// Verification service under test
    pub verifier: Option<VerifierHandle>,

    /// Database pool backing the scenario
    pub pool: Option<db::DbPool>,

    /// Owner of the keys created in the scenario
    pub user: Option<User>,

    /// Plaintext key returned at creation time
    pub raw_key: Option<String>,

    /// Id of the key created in the scenario
    pub api_key_id: Option<Uuid>,

    /// Verdict from the last verification call
    pub last_verdict: Option<VerificationResult>,
}

impl TestWorld {
    /// Spin up a throwaway database and verifier for the scenario
    pub async fn ensure_app(&mut self) {
        if self.verifier.is_some() {
            return;
        }

        let database = DatabaseConfig {
            url: format!(
                "sqlite:///tmp/tihomo_identity_bdd_{}.db?mode=rwc",
                Uuid::new_v4().simple()
            ),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
        };
        let pool = db::init_pool(&database)
            .await
            .expect("Failed to initialize scenario database");

        let codec = KeyCodec::new(
            "tihomo_".to_string(),
            DEFAULT_MAX_KEY_BODY_LENGTH,
            DEFAULT_PREFIX_DISPLAY_CHARS,
        );
        let counters = Arc::new(MemoryCounterStore::new(10_000));
        let metrics = Arc::new(InMemoryMetricsRecorder::new());
        let verifier = ApiKeyVerifier::new(
            pool.clone(),
            codec,
            counters,
            metrics,
            ApiKeysConfig::default(),
        );

        self.pool = Some(pool);
        self.verifier = Some(VerifierHandle(verifier));
    }

    pub fn verifier(&self) -> &ApiKeyVerifier {
        &self.verifier.as_ref().expect("Scenario has no verifier").0
    }

    pub fn pool(&self) -> &db::DbPool {
        self.pool.as_ref().expect("Scenario has no database")
    }

    /// Register the scenario's user
    pub async fn register_user(&mut self) {
        self.ensure_app().await;
        let user = AuthService::new(self.pool().clone())
            .create_user("owner@example.com", "Sup3rSecret!", "Scenario Owner")
            .await
            .expect("Failed to register user");
        self.user = Some(user);
    }

    /// Create an API key for the scenario's user and remember its plaintext
    pub async fn create_key(&mut self, request: CreateApiKeyRequest) {
        let user_id = self.user.as_ref().expect("No registered user").id;
        let response = self
            .verifier()
            .create_key(user_id, request)
            .await
            .expect("Failed to create API key");
        self.api_key_id = Some(response.api_key.id);
        self.raw_key = Some(response.key);
    }

    /// Run the verification chain and remember the verdict
    pub async fn verify(&mut self, raw_key: &str, ip: &str) {
        let verdict = self.verifier().verify(raw_key, ip).await;
        self.last_verdict = Some(verdict);
    }

    pub fn last_verdict(&self) -> &VerificationResult {
        self.last_verdict.as_ref().expect("No verification ran yet")
    }
}
