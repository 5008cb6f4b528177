//! Business logic services

pub mod auth;
pub mod cache;
pub mod ip_allowlist;
pub mod key_codec;
pub mod metrics;
pub mod rate_limit;
pub mod verifier;

pub use auth::AuthService;
pub use cache::{Cache, CacheEntry, CacheStats, CounterCache};
pub use ip_allowlist::{IpAllowlistMatcher, WhitelistValidation};
pub use key_codec::{GeneratedKey, KeyCodec};
pub use metrics::{
    InMemoryMetricsRecorder, MetricsRecorder, NoopMetricsRecorder, TracingMetricsRecorder,
};
pub use rate_limit::{CounterStore, MemoryCounterStore, RateLimitCounter};
pub use verifier::ApiKeyVerifier;
