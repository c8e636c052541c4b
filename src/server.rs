use anyhow::{anyhow, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::{Config, ServerConfig},
    handlers::{self, AppState},
    metrics,
    retry::retry_fixed,
    signals::setup_signal_handlers,
    storage::{self, LogStore},
};

/// Maximum accepted size of a log ingestion body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Start the log aggregator server
///
/// This function:
/// 1. Initializes metrics
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Connects to the storage backend, retrying with a fixed delay
/// 4. Binds to the configured address and serves requests
/// 5. On shutdown, drains connections (bounded) and closes the store
pub async fn start_server(config: Config) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut deadline_rx = shutdown_tx.subscribe();

    let store = connect_store(&config).await?;

    let app = create_router(
        &config.server,
        AppState {
            store: store.clone(),
        },
        metrics_handle,
    );

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting log aggregator on {}", addr);
    info!(
        "Configuration: backend {:?}, retention {}s, request timeout {}s",
        config.storage.backend,
        config.redis.log_expiry_seconds,
        config.server.request_timeout_seconds
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .into_future();

    let grace = Duration::from_secs(config.server.shutdown_timeout_seconds);
    tokio::select! {
        result = serve => result?,
        _ = async move {
            let _ = deadline_rx.recv().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("Connections still open after {:?}, forcing shutdown", grace);
        }
    }

    signal_handle.abort();

    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close log store cleanly");
    }

    info!("Server stopped gracefully");

    Ok(())
}

/// Build the log store, retrying the backend connection at startup
pub async fn connect_store(config: &Config) -> Result<LogStore> {
    let attempts = config.startup.max_connect_attempts;
    let delay = Duration::from_secs(config.startup.retry_delay_seconds);

    let backend = retry_fixed("Storage connection", attempts, delay, || {
        storage::create_backend(config)
    })
    .await
    .map_err(|e| anyhow!("failed to connect to storage after {} attempts: {}", attempts, e))?;

    info!("Storage connection established");

    Ok(LogStore::new(backend, config.redis.retention()))
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    server: &ServerConfig,
    app_state: AppState,
    metrics_handle: Arc<PrometheusHandle>,
) -> Router {
    let log_routes = Router::new()
        .route(
            "/logs",
            post(handlers::logs::store_log).get(handlers::logs::query_logs),
        )
        .route("/ready", get(handlers::health::readiness_check))
        .with_state(app_state);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(log_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_seconds,
        )))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
