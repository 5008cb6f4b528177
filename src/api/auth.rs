//! Authentication API endpoints
//!
//! Login issues the session JWT used by the key-management endpoints. The
//! exchange endpoint under /api-keys issues its own short-lived tokens.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use validator::Validate;

use crate::{
    middleware::auth::{create_access_token, AuthUser},
    models::{LoginRequest, User},
    services::AuthService,
    utils::error::{AppError, AppResult},
    AppState,
};

/// Create public routes for authentication endpoints (no auth required)
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

/// Create protected routes for authentication endpoints (auth required)
pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_current_user))
}

/// Successful login payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: User,
}

/// Login handler
///
/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    payload.validate()?;

    let auth_service = AuthService::new(state.db.clone());

    let user = auth_service
        .authenticate(&payload.email, &payload.password)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password".to_string()))?;

    let access_token = create_access_token(
        &user.id,
        &user.email,
        &state.config.auth.jwt_secret,
        state.config.auth.token_expiry_hours,
    )
    .map_err(|e| AppError::Internal(format!("Failed to create access token: {}", e)))?;

    Ok(Json(AuthResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.auth.token_expiry_hours * 3600,
        user,
    }))
}

/// Current user handler
///
/// GET /api/v1/auth/me
async fn get_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<User>> {
    let auth_service = AuthService::new(state.db.clone());

    let user = auth_service
        .get_user_by_id(auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}
