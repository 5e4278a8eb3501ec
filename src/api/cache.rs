use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use super::AppState;
use crate::cache::CacheInfo;
use crate::metrics::RequestTimer;
use crate::Result;

#[derive(Debug, Serialize)]
pub struct CacheKeys {
    pub count: usize,
    pub keys: Vec<String>,
}

pub async fn cache_info(State(state): State<AppState>) -> Json<CacheInfo> {
    let _timer = RequestTimer::new("cache_info");
    Json(state.cache.info().await)
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let _timer = RequestTimer::new("cache_clear");
    state.cache.clear_all().await;
    Json(json!({ "message": "Cache cleared successfully" }))
}

pub async fn clear_metric_cache(State(state): State<AppState>, Path(metric): Path<String>) -> Json<Value> {
    let _timer = RequestTimer::new("cache_clear_metric");
    state.cache.invalidate(&metric).await;
    Json(json!({ "message": format!("Cache cleared for metric: {}", metric) }))
}

pub async fn list_cache_keys(State(state): State<AppState>) -> Result<Json<CacheKeys>> {
    let _timer = RequestTimer::new("cache_keys");
    let keys = state.cache.keys().await?;
    Ok(Json(CacheKeys {
        count: keys.len(),
        keys,
    }))
}
