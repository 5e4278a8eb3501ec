use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::metrics::RequestTimer;
use crate::models::MetricInfo;
use crate::Result;

/// Every known metric, sorted by name.
pub async fn list_metrics(State(state): State<AppState>) -> Result<Json<Vec<MetricInfo>>> {
    let _timer = RequestTimer::new("metrics");
    let metrics = state.catalog.list().await?;
    Ok(Json(metrics.into_iter().map(MetricInfo::from).collect()))
}
