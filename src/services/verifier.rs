//! API key verification and lifecycle service
//!
//! `ApiKeyVerifier` is the orchestrator of the key pipeline: it composes the
//! key codec, the key store, the IP allow-list matcher, and the rate-limit
//! counters into one verification verdict, and owns the create / update /
//! rotate / revoke / delete contracts.
//!
//! Verification failures are reported, never thrown: `verify` always returns a
//! `VerificationResult`, and unexpected store errors collapse into a generic
//! failed verdict. Key lookup is not fail-open; only the rate-limit reads are.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::ApiKeysConfig;
use crate::db::{ApiKeyRepository, UserRepository};
use crate::models::{
    ApiKey, ApiKeyAnalytics, ApiKeyListQuery, ApiKeyStatus, ApiKeyUsageLog,
    CreateApiKeyRequest, CreateApiKeyResponse, UpdateApiKeyRequest,
    VerificationResult,
};
use crate::services::ip_allowlist::IpAllowlistMatcher;
use crate::services::key_codec::KeyCodec;
use crate::services::metrics::MetricsRecorder;
use crate::services::rate_limit::{
    daily_window_key, minute_window_key, CounterStore, RateLimitCounter, DAILY_WINDOW_TTL,
    MINUTE_WINDOW_TTL,
};
use crate::utils::error::{AppError, AppResult};

/// Orchestrates key verification and the key lifecycle
#[derive(Clone)]
pub struct ApiKeyVerifier {
    pool: SqlitePool,
    codec: KeyCodec,
    rate_limiter: RateLimitCounter,
    counters: Arc<dyn CounterStore>,
    metrics: Arc<dyn MetricsRecorder>,
    policy: ApiKeysConfig,
}

impl ApiKeyVerifier {
    pub fn new(
        pool: SqlitePool,
        codec: KeyCodec,
        counters: Arc<dyn CounterStore>,
        metrics: Arc<dyn MetricsRecorder>,
        policy: ApiKeysConfig,
    ) -> Self {
        Self {
            pool,
            codec,
            rate_limiter: RateLimitCounter::new(counters.clone()),
            counters,
            metrics,
            policy,
        }
    }

    /// Run the verification chain for a raw key presented from `client_ip`
    ///
    /// Checks run strictly in order and short-circuit on the first failure:
    /// format, hash lookup, expiry, revocation, owning user, IP allow-list,
    /// rate limit and daily quota. Usage counters are updated only on success.
    pub async fn verify(&self, raw_key: &str, client_ip: &str) -> VerificationResult {
        let result = match self.verify_inner(raw_key, client_ip).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "API key verification hit an internal error");
                VerificationResult::failure("Internal server error")
            }
        };

        self.metrics
            .verification_completed(result.is_valid, &result.message);
        result
    }

    async fn verify_inner(
        &self,
        raw_key: &str,
        client_ip: &str,
    ) -> anyhow::Result<VerificationResult> {
        if !self.codec.has_valid_format(raw_key) {
            return Ok(VerificationResult::failure("Invalid API key format"));
        }

        let key_hash = KeyCodec::hash(raw_key);
        let repo = ApiKeyRepository::new(&self.pool);
        let key = match repo.get_by_hash(&key_hash).await? {
            Some(key) => key,
            None => return Ok(VerificationResult::failure("API key not found")),
        };

        if key.is_expired() {
            return Ok(VerificationResult::failure("API key has expired"));
        }
        if key.is_revoked() {
            return Ok(VerificationResult::failure("API key has been revoked"));
        }

        let user = UserRepository::new(&self.pool).get_by_id(key.user_id).await?;
        let user = match user {
            Some(user) if user.is_active => user,
            _ => {
                return Ok(VerificationResult::failure(
                    "User account is disabled or not found",
                ))
            }
        };

        if key.security_settings.enable_ip_validation
            && !key.ip_whitelist.is_empty()
            && !IpAllowlistMatcher::is_allowed(client_ip, &key.ip_whitelist)
        {
            return Ok(VerificationResult::failure("IP address not allowed"));
        }

        if key.security_settings.enable_rate_limiting {
            let minute_exceeded = self
                .rate_limiter
                .is_rate_limit_exceeded(key.id, key.rate_limit_per_minute)
                .await;
            let daily_exceeded = !minute_exceeded
                && self
                    .rate_limiter
                    .is_daily_quota_exceeded(key.id, key.daily_usage_quota)
                    .await;
            if minute_exceeded || daily_exceeded {
                return Ok(VerificationResult::rate_limited(key.rate_limit_per_minute));
            }
        }

        self.record_success(&key).await;

        Ok(VerificationResult::success(&key, Some(user.email)))
    }

    /// Usage bookkeeping for a key that just passed every check
    ///
    /// Counter bumps are best-effort telemetry; a failed write never turns a
    /// valid key into a failed verification.
    async fn record_success(&self, key: &ApiKey) {
        let repo = ApiKeyRepository::new(&self.pool);
        if let Err(err) = repo.record_usage(key.id, Utc::now()).await {
            warn!(api_key_id = %key.id, error = %err, "Failed to record key usage");
        }

        if let Err(err) = self
            .counters
            .increment(&minute_window_key(key.id), MINUTE_WINDOW_TTL)
            .await
        {
            warn!(api_key_id = %key.id, error = %err, "Failed to bump minute counter");
        }
        if let Err(err) = self
            .counters
            .increment(&daily_window_key(key.id), DAILY_WINDOW_TTL)
            .await
        {
            warn!(api_key_id = %key.id, error = %err, "Failed to bump daily counter");
        }
    }

    /// Append a usage-log row for a verified request (analytics read side)
    pub async fn log_usage(&self, log: &ApiKeyUsageLog) {
        let repo = ApiKeyRepository::new(&self.pool);
        if let Err(err) = repo.insert_usage_log(log).await {
            warn!(api_key_id = %log.api_key_id, error = %err, "Failed to insert usage log");
        }
    }

    /// Create a key for `user_id`, enforcing the per-user cap
    ///
    /// The returned response is the only place the raw key ever appears.
    pub async fn create_key(
        &self,
        user_id: Uuid,
        request: CreateApiKeyRequest,
    ) -> AppResult<CreateApiKeyResponse> {
        self.validate_whitelist(&request.ip_whitelist)?;

        let user = UserRepository::new(&self.pool).get_by_id(user_id).await?;
        match user {
            Some(user) if user.is_active => {}
            _ => {
                return Err(AppError::NotFound(
                    "User account is disabled or not found".to_string(),
                ))
            }
        }

        let repo = ApiKeyRepository::new(&self.pool);
        let held = repo.count_for_user(user_id).await?;
        if held >= self.policy.max_keys_per_user {
            return Err(AppError::Conflict(format!(
                "Maximum limit of {} API keys exceeded",
                self.policy.max_keys_per_user
            )));
        }

        let generated = self.codec.generate();
        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            name: request.name,
            description: request.description,
            key_hash: generated.key_hash,
            key_prefix: generated.key_prefix,
            scopes: request.scopes,
            status: ApiKeyStatus::Active,
            rate_limit_per_minute: request
                .rate_limit_per_minute
                .unwrap_or(self.policy.default_rate_limit_per_minute),
            daily_usage_quota: request
                .daily_usage_quota
                .unwrap_or(self.policy.default_daily_usage_quota),
            ip_whitelist: request.ip_whitelist,
            security_settings: request.security_settings.unwrap_or_default(),
            expires_at: request.expires_at,
            usage_count: 0,
            today_usage_count: 0,
            last_reset_date: None,
            created_at: now,
            updated_at: now,
            last_used_at: None,
            revoked_at: None,
        };

        repo.insert(&key).await?;

        Ok(CreateApiKeyResponse {
            api_key: key,
            key: generated.raw_key,
        })
    }

    pub async fn get_key(&self, id: Uuid) -> AppResult<ApiKey> {
        ApiKeyRepository::new(&self.pool)
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("API key not found".to_string()))
    }

    pub async fn list_keys(
        &self,
        user_id: Uuid,
        query: &ApiKeyListQuery,
    ) -> AppResult<Vec<ApiKey>> {
        Ok(ApiKeyRepository::new(&self.pool)
            .list_for_user(user_id, query)
            .await?)
    }

    /// Apply the mutable fields of an update request
    pub async fn update_key(&self, id: Uuid, request: UpdateApiKeyRequest) -> AppResult<ApiKey> {
        if let Some(ref whitelist) = request.ip_whitelist {
            self.validate_whitelist(whitelist)?;
        }

        let mut key = self.get_key(id).await?;

        if let Some(name) = request.name {
            key.name = name;
        }
        if let Some(description) = request.description {
            key.description = Some(description);
        }
        if let Some(scopes) = request.scopes {
            key.scopes = scopes;
        }
        if let Some(rate_limit) = request.rate_limit_per_minute {
            key.rate_limit_per_minute = rate_limit;
        }
        if let Some(quota) = request.daily_usage_quota {
            key.daily_usage_quota = quota;
        }
        if let Some(whitelist) = request.ip_whitelist {
            key.ip_whitelist = whitelist;
        }
        if let Some(settings) = request.security_settings {
            key.security_settings = settings;
        }
        if let Some(expires_at) = request.expires_at {
            key.expires_at = Some(expires_at);
        }
        key.updated_at = Utc::now();

        ApiKeyRepository::new(&self.pool).update(&key).await?;

        Ok(key)
    }

    /// Revoke a key; calling this on an already-revoked key is a no-op success
    pub async fn revoke_key(&self, id: Uuid) -> AppResult<()> {
        let mut key = self.get_key(id).await?;
        if key.is_revoked() {
            return Ok(());
        }

        let now = Utc::now();
        key.status = ApiKeyStatus::Revoked;
        key.revoked_at = Some(now);
        key.updated_at = now;

        ApiKeyRepository::new(&self.pool).update(&key).await?;

        Ok(())
    }

    pub async fn delete_key(&self, id: Uuid) -> AppResult<()> {
        let deleted = ApiKeyRepository::new(&self.pool).delete(id).await?;
        if !deleted {
            return Err(AppError::NotFound("API key not found".to_string()));
        }
        Ok(())
    }

    /// Replace the key material, leaving every other field untouched
    pub async fn rotate_key(&self, id: Uuid) -> AppResult<CreateApiKeyResponse> {
        let mut key = self.get_key(id).await?;

        let generated = self.codec.generate();
        key.key_hash = generated.key_hash;
        key.key_prefix = generated.key_prefix;
        key.updated_at = Utc::now();

        ApiKeyRepository::new(&self.pool).update(&key).await?;

        Ok(CreateApiKeyResponse {
            api_key: key,
            key: generated.raw_key,
        })
    }

    /// Usage analytics for one key; defaults to the trailing 30 days
    pub async fn analytics(
        &self,
        id: Uuid,
        from: Option<chrono::DateTime<Utc>>,
        to: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<ApiKeyAnalytics> {
        // 404 for unknown keys before touching the log table
        self.get_key(id).await?;

        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(30));

        Ok(ApiKeyRepository::new(&self.pool)
            .analytics(id, from, to)
            .await?)
    }

    fn validate_whitelist(&self, whitelist: &[String]) -> AppResult<()> {
        let validation = IpAllowlistMatcher::validate_whitelist(whitelist);
        if !validation.is_valid {
            return Err(AppError::ValidationError(validation.errors.join("; ")));
        }
        Ok(())
    }
}
