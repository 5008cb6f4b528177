//! API routes and handlers
//!
//! This module defines all API endpoints and their routing.

use axum::{routing::get, Router};

use crate::AppState;

mod api_keys;
mod auth;
mod health;

pub use health::*;

/// Public API routes (no authentication required)
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Authentication endpoints (no auth required)
        .nest("/auth", auth::public_routes())
        // Verify and exchange are called by gateways on behalf of key holders
        .nest("/api-keys", api_keys::public_routes())
}

/// Protected API routes (authentication required)
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        // Protected auth endpoints (me)
        .nest("/auth", auth::protected_routes())
        // Key lifecycle endpoints
        .nest("/api-keys", api_keys::routes())
}

/// Create the full API router (public + protected; useful for tests)
pub fn routes() -> Router<AppState> {
    public_routes().merge(protected_routes())
}
