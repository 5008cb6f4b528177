//! API key management endpoints
//!
//! The protected routes cover the key lifecycle for the logged-in owner. The
//! public routes carry the anonymous verify and exchange operations that
//! gateways call on behalf of key holders; both resolve the caller's IP from
//! proxy headers before falling back to the socket address.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::auth::create_exchange_token,
    middleware::{client_ip, AuthUser},
    models::{
        AnalyticsQuery, ApiKey, ApiKeyAnalytics, ApiKeyListQuery, ApiKeyUsageLog,
        CreateApiKeyRequest, CreateApiKeyResponse, ExchangeTokenResponse, UpdateApiKeyRequest,
        VerificationResult, VerifyApiKeyRequest,
    },
    utils::error::{AppError, AppResult},
    AppState,
};

/// Lifecycle routes, mounted behind the auth middleware
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_api_keys).post(create_api_key))
        .route(
            "/{id}",
            get(get_api_key).put(update_api_key).delete(delete_api_key),
        )
        .route("/{id}/revoke", post(revoke_api_key))
        .route("/{id}/rotate", post(rotate_api_key))
        .route("/{id}/analytics", get(api_key_analytics))
}

/// Anonymous routes called by gateways
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_api_key))
        .route("/exchange", post(exchange_api_key))
}

async fn list_api_keys(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ApiKeyListQuery>,
) -> AppResult<Json<Vec<ApiKey>>> {
    let keys = state.verifier.list_keys(auth_user.id, &query).await?;
    Ok(Json(keys))
}

async fn create_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateApiKeyRequest>,
) -> AppResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    payload.validate()?;

    let response = state.verifier.create_key(auth_user.id, payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Fetch a key, enforcing that it belongs to the caller
///
/// Foreign keys 404 rather than 403 so key IDs are not probeable.
async fn owned_key(state: &AppState, auth_user: &AuthUser, id: Uuid) -> AppResult<ApiKey> {
    let key = state.verifier.get_key(id).await?;
    if key.user_id != auth_user.id {
        return Err(AppError::NotFound("API key not found".to_string()));
    }
    Ok(key)
}

async fn get_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiKey>> {
    let key = owned_key(&state, &auth_user, id).await?;
    Ok(Json(key))
}

async fn update_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateApiKeyRequest>,
) -> AppResult<Json<ApiKey>> {
    payload.validate()?;
    owned_key(&state, &auth_user, id).await?;

    let key = state.verifier.update_key(id, payload).await?;
    Ok(Json(key))
}

async fn delete_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    owned_key(&state, &auth_user, id).await?;

    state.verifier.delete_key(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    owned_key(&state, &auth_user, id).await?;

    state.verifier.revoke_key(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rotate_api_key(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CreateApiKeyResponse>> {
    owned_key(&state, &auth_user, id).await?;

    let response = state.verifier.rotate_key(id).await?;
    Ok(Json(response))
}

async fn api_key_analytics(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<AnalyticsQuery>,
) -> AppResult<Json<ApiKeyAnalytics>> {
    owned_key(&state, &auth_user, id).await?;

    let analytics = state.verifier.analytics(id, query.from, query.to).await?;
    Ok(Json(analytics))
}

/// Anonymous verification
///
/// POST /api/v1/api-keys/verify
///
/// Always responds 200 with the verdict; the verdict's message carries the
/// failure reason. Internal failures surface as a failed verdict too.
async fn verify_api_key(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<VerifyApiKeyRequest>,
) -> Json<VerificationResult> {
    let ip = client_ip(&headers, addr.ip()).to_string();
    let result = state.verifier.verify(&payload.api_key, &ip).await;

    // Usage-log rows are opt-out via the key's enable_usage_analytics flag
    if result.usage_logging_enabled {
        if let Some(api_key_id) = result.api_key_id {
            let log = ApiKeyUsageLog::new(api_key_id, "POST", "/api/v1/api-keys/verify", &ip);
            state.verifier.log_usage(&log).await;
        }
    }

    Json(result)
}

/// Anonymous key-for-token exchange
///
/// POST /api/v1/api-keys/exchange
///
/// The body is the raw key as a bare JSON string. A passing verification
/// yields a short-lived JWT scoped to the key.
async fn exchange_api_key(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(raw_key): Json<String>,
) -> AppResult<Json<ExchangeTokenResponse>> {
    let ip = client_ip(&headers, addr.ip()).to_string();
    let result = state.verifier.verify(&raw_key, &ip).await;

    if !result.is_valid {
        // A tripped per-key limit is the caller's cue to back off, not a bad
        // credential
        if result.rate_limit.is_some() {
            return Err(AppError::RateLimited {
                message: result.message,
                limit: result.rate_limit,
            });
        }
        return Err(AppError::Unauthorized(result.message));
    }

    // A valid verdict always carries the identity fields
    let user_id = result
        .user_id
        .ok_or_else(|| AppError::Internal("Verification result missing user".to_string()))?;
    let user_email = result.user_email.clone().unwrap_or_default();
    let scopes = result.scopes.clone().unwrap_or_default();

    let (access_token, expires_at) = create_exchange_token(
        &user_id,
        &user_email,
        scopes,
        &state.config.auth.jwt_secret,
        state.config.auth.exchange_token_expiry_minutes,
    )
    .map_err(|e| AppError::Internal(format!("Failed to create exchange token: {}", e)))?;

    if result.usage_logging_enabled {
        if let Some(api_key_id) = result.api_key_id {
            let log = ApiKeyUsageLog::new(api_key_id, "POST", "/api/v1/api-keys/exchange", &ip);
            state.verifier.log_usage(&log).await;
        }
    }

    Ok(Json(ExchangeTokenResponse {
        access_token,
        expires_at,
        token_type: "Bearer".to_string(),
        user_id,
        user_email,
    }))
}
