//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - API key policy settings (prefix, per-user cap, default limits)
//! - Gateway exchange settings (skip/processed paths, exchange endpoint)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api_keys: ApiKeysConfig,
    #[serde(default)]
    pub counters: CountersConfig,
    /// Gateway exchange middleware configuration (disabled when absent)
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// TLS/HTTPS configuration (if not set, server runs HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_file: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_file: PathBuf,
    /// Minimum TLS version (1.2 or 1.3, defaults to 1.3)
    #[serde(default = "default_min_tls_version")]
    pub min_version: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_min_tls_version() -> String {
    "1.3".to_string()
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_expiry")]
    pub token_expiry_hours: u64,
    /// Lifetime of JWTs minted by the API-key exchange endpoint
    #[serde(default = "default_exchange_token_expiry")]
    pub exchange_token_expiry_minutes: u64,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
    /// Seeded into an empty users table at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

/// Initial admin account, applied only when no users exist yet
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapAdminConfig {
    pub email: String,
    pub password: String,
    #[serde(default = "default_bootstrap_admin_name")]
    pub name: String,
}

fn default_bootstrap_admin_name() -> String {
    "Administrator".to_string()
}

fn default_token_expiry() -> u64 {
    24
}

fn default_exchange_token_expiry() -> u64 {
    15
}

fn default_password_min_length() -> usize {
    8
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation (default: true for production)
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/tihomo/identity")
}

fn default_log_prefix() -> String {
    "tihomo-identity".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

/// API key policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeysConfig {
    /// Literal prefix stamped onto every generated key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Hard cap on non-deleted keys per user
    #[serde(default = "default_max_keys_per_user")]
    pub max_keys_per_user: i64,
    /// Per-minute ceiling applied when a key is created without one
    #[serde(default = "default_rate_limit_per_minute")]
    pub default_rate_limit_per_minute: i64,
    /// Daily quota applied when a key is created without one
    #[serde(default = "default_daily_usage_quota")]
    pub default_daily_usage_quota: i64,
}

fn default_key_prefix() -> String {
    "tihomo_".to_string()
}

fn default_max_keys_per_user() -> i64 {
    10
}

fn default_rate_limit_per_minute() -> i64 {
    100
}

fn default_daily_usage_quota() -> i64 {
    10_000
}

impl Default for ApiKeysConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            max_keys_per_user: default_max_keys_per_user(),
            default_rate_limit_per_minute: default_rate_limit_per_minute(),
            default_daily_usage_quota: default_daily_usage_quota(),
        }
    }
}

/// Counter store configuration for rate-limit/quota windows
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountersConfig {
    /// Maximum number of window counters held in memory
    #[serde(default = "default_counter_max_entries")]
    pub max_entries: usize,
}

fn default_counter_max_entries() -> usize {
    100_000
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            max_entries: default_counter_max_entries(),
        }
    }
}

/// Gateway exchange middleware configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Full URL of the exchange endpoint; requests are POSTed to it verbatim,
    /// so include the path (e.g. `http://identity:5080/api/v1/api-keys/exchange`)
    pub exchange_url: String,
    /// HTTP timeout for the exchange call, in seconds
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
    /// Header carrying the raw API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Path prefixes passed through untouched (health checks, public auth)
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
    /// Path prefixes on which the exchange runs
    #[serde(default = "default_processed_paths")]
    pub processed_paths: Vec<String>,
}

fn default_exchange_timeout() -> u64 {
    10
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_skip_paths() -> Vec<String> {
    vec![
        "/api/v1/health".to_string(),
        "/api/v1/auth".to_string(),
        "/api/v1/api-keys/exchange".to_string(),
        "/api/v1/api-keys/verify".to_string(),
    ]
}

fn default_processed_paths() -> Vec<String> {
    vec!["/api/v1".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                workers: default_workers(),
                request_timeout_secs: None,
                tls: None,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production-minimum-32-characters-long".to_string(),
                token_expiry_hours: default_token_expiry(),
                exchange_token_expiry_minutes: default_exchange_token_expiry(),
                password_min_length: default_password_min_length(),
                bootstrap_admin: None,
            },
            database: DatabaseConfig {
                url: "sqlite://./data/tihomo-identity.db".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            logging: LoggingConfig::default(),
            api_keys: ApiKeysConfig::default(),
            counters: CountersConfig::default(),
            gateway: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with TIHOMO_)
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        // Check for config path override from environment
        let config_path = std::env::var("TIHOMO_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = if let Some(ref path) = config_path {
            if path.exists() {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                serde_norway::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            } else {
                eprintln!(
                    "[CONFIG] Config file path exists but file not found: {:?}",
                    path
                );
                AppConfig::default()
            }
        } else {
            eprintln!("[CONFIG] No config file found, using defaults");
            AppConfig::default()
        };

        // Apply environment variable overrides
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Current directory
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            // System config directory
            PathBuf::from("/etc/tihomo-identity/config.yaml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("tihomo-identity/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("TIHOMO_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("TIHOMO_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Database overrides
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        // Auth overrides
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TIHOMO_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        // Gateway overrides
        if let Ok(url) = std::env::var("TIHOMO_EXCHANGE_URL") {
            let gateway = self.gateway.get_or_insert_with(|| GatewayConfig {
                exchange_url: url.clone(),
                exchange_timeout_secs: default_exchange_timeout(),
                api_key_header: default_api_key_header(),
                skip_paths: default_skip_paths(),
                processed_paths: default_processed_paths(),
            });
            gateway.exchange_url = url;
        }
    }

    /// Validate the loaded configuration
    fn validate(&self) -> Result<()> {
        // Validate JWT secret length
        if self.auth.jwt_secret.len() < 32 {
            anyhow::bail!("JWT secret must be at least 32 characters long");
        }

        // Validate port
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        // Validate database URL
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.api_keys.key_prefix.is_empty() {
            anyhow::bail!("API key prefix cannot be empty");
        }
        if self.api_keys.max_keys_per_user < 1 {
            anyhow::bail!("max_keys_per_user must be at least 1");
        }
        if self.api_keys.default_rate_limit_per_minute < 1
            || self.api_keys.default_daily_usage_quota < 1
        {
            anyhow::bail!("Default rate limits must be positive");
        }

        if let Some(ref gateway) = self.gateway {
            if gateway.exchange_url.is_empty() {
                anyhow::bail!("Gateway exchange URL cannot be empty");
            }
        }

        if let Some(ref admin) = self.auth.bootstrap_admin {
            if admin.email.is_empty() {
                anyhow::bail!("Bootstrap admin email cannot be empty");
            }
            if admin.password.len() < self.auth.password_min_length {
                anyhow::bail!(
                    "Bootstrap admin password must be at least {} characters",
                    self.auth.password_min_length
                );
            }
        }

        // Validate TLS configuration if present
        if let Some(ref tls) = self.server.tls {
            if !tls.cert_file.exists() {
                anyhow::bail!("TLS certificate file not found: {:?}", tls.cert_file);
            }
            if !tls.key_file.exists() {
                anyhow::bail!("TLS key file not found: {:?}", tls.key_file);
            }
            if tls.min_version != "1.2" && tls.min_version != "1.3" {
                anyhow::bail!(
                    "Invalid TLS minimum version: {}. Must be '1.2' or '1.3'",
                    tls.min_version
                );
            }
        }

        Ok(())
    }

    /// Create a default configuration file
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let config = AppConfig::default();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_norway::to_string(&config)?;
        std::fs::write(path, yaml)?;

        Ok(())
    }
}
