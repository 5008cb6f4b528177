//! Observability sinks for the exchange pipeline
//!
//! The gateway middleware and the verifier report outcomes through a recorder
//! they are handed at construction time. No process-wide statics: tests inject
//! an in-memory recorder and read it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

/// Counter sink for exchange and verification outcomes
pub trait MetricsRecorder: Send + Sync {
    /// A request carried an API key and the exchange produced a token
    fn exchange_succeeded(&self, latency: Duration);

    /// A request carried an API key and the exchange was refused or errored
    fn exchange_failed(&self, latency: Duration, reason: &str);

    /// A processed-path request arrived without an API key
    fn request_without_key(&self);

    /// The verifier finished a verification with the given outcome message
    fn verification_completed(&self, is_valid: bool, outcome: &str);
}

/// Recorder that emits structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsRecorder;

impl MetricsRecorder for TracingMetricsRecorder {
    fn exchange_succeeded(&self, latency: Duration) {
        info!(latency_ms = latency.as_millis() as u64, "API key exchange succeeded");
    }

    fn exchange_failed(&self, latency: Duration, reason: &str) {
        info!(
            latency_ms = latency.as_millis() as u64,
            reason, "API key exchange failed"
        );
    }

    fn request_without_key(&self) {
        debug!("Processed path request without API key");
    }

    fn verification_completed(&self, is_valid: bool, outcome: &str) {
        debug!(is_valid, outcome, "API key verification completed");
    }
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn exchange_succeeded(&self, _latency: Duration) {}
    fn exchange_failed(&self, _latency: Duration, _reason: &str) {}
    fn request_without_key(&self) {}
    fn verification_completed(&self, _is_valid: bool, _outcome: &str) {}
}

/// Recorder holding plain counters, for tests and local diagnostics
#[derive(Debug, Default)]
pub struct InMemoryMetricsRecorder {
    exchange_successes: AtomicU64,
    exchange_failures: AtomicU64,
    requests_without_key: AtomicU64,
    verifications: AtomicU64,
    failure_reasons: Mutex<Vec<String>>,
}

impl InMemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange_successes(&self) -> u64 {
        self.exchange_successes.load(Ordering::Relaxed)
    }

    pub fn exchange_failures(&self) -> u64 {
        self.exchange_failures.load(Ordering::Relaxed)
    }

    pub fn requests_without_key(&self) -> u64 {
        self.requests_without_key.load(Ordering::Relaxed)
    }

    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }

    pub fn failure_reasons(&self) -> Vec<String> {
        self.failure_reasons
            .lock()
            .map(|reasons| reasons.clone())
            .unwrap_or_default()
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn exchange_succeeded(&self, _latency: Duration) {
        self.exchange_successes.fetch_add(1, Ordering::Relaxed);
    }

    fn exchange_failed(&self, _latency: Duration, reason: &str) {
        self.exchange_failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut reasons) = self.failure_reasons.lock() {
            reasons.push(reason.to_string());
        }
    }

    fn request_without_key(&self) {
        self.requests_without_key.fetch_add(1, Ordering::Relaxed);
    }

    fn verification_completed(&self, is_valid: bool, outcome: &str) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        if !is_valid {
            if let Ok(mut reasons) = self.failure_reasons.lock() {
                reasons.push(outcome.to_string());
            }
        }
    }
}
