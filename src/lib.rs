//! TiHoMo Identity Library
//!
//! API-key issuance, verification, and gateway token exchange for the TiHoMo
//! platform. The binary in `main.rs` serves the HTTP surface; the gateway
//! middleware in [`middleware::gateway`] can also be mounted in front of other
//! services.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use middleware::{auth_middleware, AuthUser, Claims};
use services::{ApiKeyVerifier, CounterStore, MetricsRecorder};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// API key verification pipeline
    pub verifier: ApiKeyVerifier,
    /// Rate-limit counter backend, exposed for health reporting
    pub counters: Arc<dyn CounterStore>,
    /// Metrics sink
    pub metrics: Arc<dyn MetricsRecorder>,
}
