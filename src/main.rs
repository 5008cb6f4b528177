//! TiHoMo Identity - API key issuance, verification, and token exchange
//!
//! Runs the identity HTTP surface (login, key lifecycle, verify, exchange)
//! and, when a gateway section is configured, mounts the exchange middleware
//! that trades incoming API keys for short-lived JWTs.

use std::env;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use config::LogFormat;
use tihomo_identity::{
    api, config, db, middleware,
    services::{
        key_codec::{DEFAULT_MAX_KEY_BODY_LENGTH, DEFAULT_PREFIX_DISPLAY_CHARS},
        ApiKeyVerifier, KeyCodec, MemoryCounterStore, TracingMetricsRecorder,
    },
    AppConfig, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("TiHoMo Identity {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!("TiHoMo Identity starting up");
    info!("Configuration loaded successfully");

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let db = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    bootstrap_admin(&db, &config).await?;

    let codec = KeyCodec::new(
        config.api_keys.key_prefix.clone(),
        DEFAULT_MAX_KEY_BODY_LENGTH,
        DEFAULT_PREFIX_DISPLAY_CHARS,
    );
    let counters: Arc<dyn tihomo_identity::services::CounterStore> =
        Arc::new(MemoryCounterStore::new(config.counters.max_entries));
    let metrics: Arc<dyn tihomo_identity::services::MetricsRecorder> =
        Arc::new(TracingMetricsRecorder);

    let verifier = ApiKeyVerifier::new(
        db.clone(),
        codec,
        counters.clone(),
        metrics.clone(),
        config.api_keys.clone(),
    );

    let state = AppState {
        config: config.clone(),
        db,
        verifier,
        counters,
        metrics: metrics.clone(),
    };

    let app = create_router(state, &config, metrics)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    if let Some(ref tls_config) = config.server.tls {
        info!("Starting HTTPS server on https://{}", addr);
        info!("TLS certificate: {:?}", tls_config.cert_file);
        info!("TLS minimum version: {}", tls_config.min_version);

        let rustls_config = create_rustls_config(tls_config).await?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        info!("HTTPS server is ready to accept connections");

        // Use axum-server for TLS with ConnectInfo support
        let handle = axum_server::Handle::new();
        tokio::spawn(drain_on_shutdown(handle.clone()));

        axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)?
            .handle(handle)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("HTTPS server error")?;
    } else {
        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        info!("HTTP server is ready to accept connections");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    }

    info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

/// Drain the TLS server once a shutdown signal arrives
async fn drain_on_shutdown(handle: axum_server::Handle<std::net::SocketAddr>) {
    shutdown_signal().await;
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
}

/// Create RusTLS configuration from TLS config
async fn create_rustls_config(
    tls_config: &config::TlsConfig,
) -> Result<axum_server::tls_rustls::RustlsConfig> {
    use axum_server::tls_rustls::RustlsConfig;
    use rustls::crypto::aws_lc_rs::default_provider;
    use rustls::ServerConfig;

    let cert_file = std::fs::File::open(&tls_config.cert_file)
        .with_context(|| format!("Failed to open certificate file: {:?}", tls_config.cert_file))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|r| r.ok())
        .collect();

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", tls_config.cert_file);
    }

    let key_file = std::fs::File::open(&tls_config.key_file)
        .with_context(|| format!("Failed to open key file: {:?}", tls_config.key_file))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to read private key: {:?}", tls_config.key_file))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {:?}", tls_config.key_file))?;

    let provider = default_provider();

    let versions: Vec<&'static rustls::SupportedProtocolVersion> =
        match tls_config.min_version.as_str() {
            "1.3" => vec![&rustls::version::TLS13],
            _ => vec![&rustls::version::TLS12, &rustls::version::TLS13],
        };

    info!("TLS configured with minimum version: {}", tls_config.min_version);

    let mut server_config = ServerConfig::builder_with_provider(provider.into())
        .with_protocol_versions(&versions)
        .context("Failed to set TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key.into())
        .context("Failed to build TLS server config")?;

    // Enable ALPN for HTTP/1.1 and HTTP/2
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            // Console-only logging (development mode)
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            // File-only logging (production mode)
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_both_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Initialize console-only logging
fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
    }
}

/// Initialize file-only logging
fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(writer),
                )
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_writer(writer),
                )
                .init();
        }
    }
}

/// Initialize both console and file logging
fn init_both_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true)) // Console
                .with(fmt::layer().json().with_target(true).with_writer(writer)) // File
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false)) // Console
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(writer),
                ) // File
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                ) // Console
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_writer(writer),
                ) // File
                .init();
        }
    }
}

/// Seed the configured admin account into an empty users table
///
/// Runs only on first start; once any user exists the config entry is ignored.
async fn bootstrap_admin(db: &tihomo_identity::DbPool, config: &AppConfig) -> Result<()> {
    let Some(ref admin) = config.auth.bootstrap_admin else {
        return Ok(());
    };

    let existing = tihomo_identity::db::UserRepository::new(db)
        .count()
        .await
        .context("Failed to count users for bootstrap")?;
    if existing > 0 {
        return Ok(());
    }

    tihomo_identity::services::AuthService::new(db.clone())
        .create_user(&admin.email, &admin.password, &admin.name)
        .await
        .context("Failed to create bootstrap admin user")?;
    info!(email = %admin.email, "Bootstrap admin user created");

    Ok(())
}

/// Ensure the data directory exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(
    state: AppState,
    config: &AppConfig,
    metrics: Arc<dyn tihomo_identity::services::MetricsRecorder>,
) -> Result<Router> {
    // CORS is only needed when a browser client is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Transport rate limiting: wide limits on the public verify/exchange
    // endpoints gateways call constantly, strict limits on the
    // authenticated management surface
    let exchange_rate_limit =
        middleware::RateLimitState::new(middleware::rate_limit::exchange_rate_limit_config());
    let auth_rate_limit =
        middleware::RateLimitState::new(middleware::rate_limit::auth_rate_limit_config());

    middleware::rate_limit::spawn_rate_limit_cleanup(exchange_rate_limit.clone());
    middleware::rate_limit::spawn_rate_limit_cleanup(auth_rate_limit.clone());

    // Authentication must not be applied globally, otherwise public endpoints
    // like `/api/v1/auth/login` become unusable. Public routes stay
    // unauthenticated; protected routes get the auth middleware.
    let mut router = Router::new()
        .nest(
            "/api/v1",
            api::public_routes().layer(axum::middleware::from_fn_with_state(
                exchange_rate_limit,
                middleware::rate_limit_middleware,
            )),
        )
        .nest(
            "/api/v1",
            api::protected_routes()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::auth::auth_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth_rate_limit,
                    middleware::rate_limit_middleware,
                )),
        )
        .layer(axum::middleware::from_fn(
            middleware::security_headers::api_cache_control_middleware,
        ))
        .with_state(state);

    // Mount the gateway exchange layer when configured. It runs before auth,
    // so fronted requests carrying an API key arrive downstream with a JWT.
    if let Some(gateway_config) = config.gateway.clone() {
        info!(
            "Gateway exchange enabled, exchange endpoint: {}",
            gateway_config.exchange_url
        );
        let gateway_state = middleware::GatewayState::new(gateway_config, metrics)
            .context("Failed to initialize gateway exchange client")?;
        router = router.layer(axum::middleware::from_fn_with_state(
            gateway_state,
            middleware::gateway_exchange_middleware,
        ));
    }

    Ok(router
        .layer(axum::middleware::from_fn(
            middleware::security_headers::security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(trace_layer)
        .layer(cors))
}

/// Print help message
fn print_help() {
    println!(
        r#"TiHoMo Identity {}

USAGE:
    tihomo-identity [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information

ENVIRONMENT:
    TIHOMO_CONFIG       Path to configuration file (default: config.yaml)

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by TIHOMO_CONFIG environment variable
    2. ./config.yaml
    3. /etc/tihomo-identity/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
