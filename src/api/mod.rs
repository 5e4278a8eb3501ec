//! HTTP surface of the service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::{MemoryCacheBackend, ResultCache};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::ingest::IngestPipeline;
use crate::query::QueryService;
use crate::store::{DuckDbStorage, Storage};
use crate::{Result, TimeseriesError};

pub mod cache;
pub mod catalog;
pub mod health;
pub mod ingest;
pub mod query;

/// Shared handles every handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub catalog: Catalog,
    pub cache: ResultCache,
    pub ingest: IngestPipeline,
    pub queries: QueryService,
    pub strict_query_ranges: bool,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, cache: ResultCache, config: &Config) -> Self {
        Self {
            catalog: Catalog::new(Arc::clone(&storage)),
            ingest: IngestPipeline::new(Arc::clone(&storage), cache.clone())
                .with_policy(config.kind_conflict_policy),
            queries: QueryService::new(Arc::clone(&storage), cache.clone()).with_timeout(config.query_timeout),
            storage,
            cache,
            strict_query_ranges: config.strict_query_ranges,
        }
    }

    /// Opens the configured database and cache.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = match &config.db_path {
            Some(path) => DuckDbStorage::open(path)?,
            None => DuckDbStorage::open_in_memory()?,
        };
        let cache = if config.cache_enabled {
            ResultCache::new(Arc::new(MemoryCacheBackend::new(config.cache_max_entries)))
                .with_ttl(config.cache_ttl)
                .with_timeout(config.cache_timeout)
        } else {
            info!("result cache disabled");
            ResultCache::disabled()
        };
        Ok(Self::new(Arc::new(storage), cache, config))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/internal/metrics", get(health::prometheus_metrics))
        .route("/ingest", post(ingest::ingest_data))
        .route("/query", post(query::query_data))
        .route("/metrics", get(catalog::list_metrics))
        .route("/cache/info", get(cache::cache_info))
        .route("/cache/clear", post(cache::clear_cache))
        .route("/cache/metrics/:metric/clear", post(cache::clear_metric_cache))
        .route("/cache/keys", get(cache::list_cache_keys))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds the listener and serves until SIGINT or SIGTERM.
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TimeseriesError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Starting timeseries API on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TimeseriesError::Internal(format!("Server error: {}", e)))?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

/// Malformed bodies get the same `{"error": ...}` shape as every other failure.
pub(crate) fn rejected(rejection: axum::extract::rejection::JsonRejection) -> TimeseriesError {
    TimeseriesError::Validation(rejection.body_text())
}
