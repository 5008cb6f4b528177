//! API key models
//!
//! Wire shapes use camelCase field names; the exchange response in particular is a
//! compatibility contract with the gateway and must not be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of an API key
///
/// Expiry is derived from `expires_at`, never stored. Revoked is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    #[default]
    Active,
    Revoked,
}

impl std::fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiKeyStatus::Active => write!(f, "active"),
            ApiKeyStatus::Revoked => write!(f, "revoked"),
        }
    }
}

impl std::str::FromStr for ApiKeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ApiKeyStatus::Active),
            "revoked" => Ok(ApiKeyStatus::Revoked),
            _ => Err(format!("Invalid api key status: {}", s)),
        }
    }
}

/// Per-key security policy, statically typed and persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    pub require_https: bool,
    pub allow_cors_requests: bool,
    pub allowed_origins: Vec<String>,
    pub enable_usage_analytics: bool,
    pub max_requests_per_second: i64,
    pub enable_ip_validation: bool,
    pub enable_rate_limiting: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            require_https: false,
            allow_cors_requests: false,
            allowed_origins: Vec::new(),
            enable_usage_analytics: true,
            max_requests_per_second: 10,
            enable_ip_validation: true,
            enable_rate_limiting: true,
        }
    }
}

/// API key entity
///
/// `key_hash` is the sole verification lookup key and never leaves the server;
/// `key_prefix` is a display-only slice of the raw key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub status: ApiKeyStatus,
    pub rate_limit_per_minute: i64,
    pub daily_usage_quota: i64,
    pub ip_whitelist: Vec<String>,
    pub security_settings: SecuritySettings,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub today_usage_count: i64,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Whether the key is past its optional expiry timestamp
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires| Utc::now() >= expires)
    }

    /// Whether the key has been revoked (terminal state)
    pub fn is_revoked(&self) -> bool {
        self.status == ApiKeyStatus::Revoked
    }
}

/// Request to create a new API key
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(custom(function = crate::utils::validation::validate_scopes))]
    pub scopes: Vec<String>,
    /// Per-minute request ceiling; server default applies when omitted
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: Option<i64>,
    /// Daily request ceiling; server default applies when omitted
    #[validate(range(min = 1))]
    pub daily_usage_quota: Option<i64>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    pub security_settings: Option<SecuritySettings>,
    /// Optional expiry (RFC3339 timestamp)
    pub expires_at: Option<DateTime<Utc>>,
}

/// Response for key creation and rotation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub api_key: ApiKey,
    /// Plaintext API key (only returned here, never retrievable again)
    pub key: String,
}

/// Request to update mutable API key fields
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApiKeyRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(custom(function = crate::utils::validation::validate_scopes))]
    pub scopes: Option<Vec<String>>,
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: Option<i64>,
    #[validate(range(min = 1))]
    pub daily_usage_quota: Option<i64>,
    pub ip_whitelist: Option<Vec<String>>,
    pub security_settings: Option<SecuritySettings>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// List filter query parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyListQuery {
    pub status: Option<ApiKeyStatus>,
    pub scope: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// Anonymous verification request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyApiKeyRequest {
    pub api_key: String,
}

/// Verdict produced by the verification state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether the verified key wants usage-log rows written; never serialized
    #[serde(skip)]
    pub usage_logging_enabled: bool,
    /// Per-minute ceiling of the key that tripped its limit; never serialized
    #[serde(skip)]
    pub rate_limit: Option<i64>,
}

impl VerificationResult {
    /// Successful verdict carrying the verified identity
    pub fn success(key: &ApiKey, user_email: Option<String>) -> Self {
        Self {
            is_valid: true,
            user_id: Some(key.user_id),
            api_key_id: Some(key.id),
            scopes: Some(key.scopes.clone()),
            user_email,
            message: "API key is valid".to_string(),
            error_message: None,
            usage_logging_enabled: key.security_settings.enable_usage_analytics,
            rate_limit: None,
        }
    }

    /// Failed verdict with a distinguishing human-readable reason
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            is_valid: false,
            user_id: None,
            api_key_id: None,
            scopes: None,
            user_email: None,
            message: message.clone(),
            error_message: Some(message),
            usage_logging_enabled: false,
            rate_limit: None,
        }
    }

    /// Failed verdict for a key that exhausted its per-minute quota
    pub fn rate_limited(limit: i64) -> Self {
        let mut result = Self::failure("Rate limit exceeded");
        result.rate_limit = Some(limit);
        result
    }
}

/// Token payload returned by the exchange endpoint
///
/// Field names are consumed verbatim by the gateway middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeTokenResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub user_id: Uuid,
    pub user_email: String,
}

/// One verified request, recorded when usage analytics is enabled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyUsageLog {
    pub id: Uuid,
    pub api_key_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub endpoint: String,
    pub status_code: i64,
    pub response_time_ms: i64,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub request_size: Option<i64>,
    pub response_size: Option<i64>,
    pub error_message: Option<String>,
    pub scopes_used: Vec<String>,
    pub is_success: bool,
}

impl ApiKeyUsageLog {
    /// New log entry for a verified request
    pub fn new(api_key_id: Uuid, method: &str, endpoint: &str, ip_address: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key_id,
            timestamp: Utc::now(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status_code: 200,
            response_time_ms: 0,
            ip_address: ip_address.to_string(),
            user_agent: None,
            request_size: None,
            response_size: None,
            error_message: None,
            scopes_used: Vec::new(),
            is_success: true,
        }
    }
}

/// Date-range query for usage analytics
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Aggregated usage statistics for one key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAnalytics {
    pub api_key_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub requests_per_day: Vec<DailyRequestCount>,
    pub top_endpoints: Vec<EndpointRequestCount>,
}

/// Requests bucketed by UTC day
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRequestCount {
    pub date: String,
    pub count: i64,
}

/// Requests grouped by endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRequestCount {
    pub endpoint: String,
    pub count: i64,
}
