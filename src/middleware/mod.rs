//! Middleware components
//!
//! This module contains middleware for:
//! - Authentication (JWT)
//! - Gateway API-key exchange
//! - Transport rate limiting
//! - Security headers

pub mod auth;
pub mod gateway;
pub mod rate_limit;
pub mod security_headers;

pub use auth::{auth_middleware, AuthUser, Claims};
pub use gateway::{gateway_exchange_middleware, ExchangeClient, GatewayState};
pub use rate_limit::{client_ip, rate_limit_middleware, RateLimitConfig, RateLimitState};
