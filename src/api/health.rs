use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use super::AppState;
use crate::cache::CacheStatus;
use crate::metrics::{self, RequestTimer};

#[derive(Debug, Serialize)]
pub struct ServiceBanner {
    pub message: &'static str,
    pub version: &'static str,
    pub cache_status: CacheStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: CacheStatus,
}

async fn cache_status(state: &AppState) -> CacheStatus {
    if !state.cache.is_enabled() {
        CacheStatus::Disabled
    } else if state.cache.is_connected().await {
        CacheStatus::Connected
    } else {
        CacheStatus::Disconnected
    }
}

pub async fn root(State(state): State<AppState>) -> Json<ServiceBanner> {
    Json(ServiceBanner {
        message: "Timeseries API Service",
        version: env!("CARGO_PKG_VERSION"),
        cache_status: cache_status(&state).await,
    })
}

/// 200 while the database answers; the cache state is informational only.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let _timer = RequestTimer::new("health");
    let cache = cache_status(&state).await;

    match state.storage.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "healthy",
                database: "healthy",
                cache,
            }),
        ),
        Err(err) => {
            warn!(error = %err, "database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "unhealthy",
                    database: "unhealthy",
                    cache,
                }),
            )
        }
    }
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

