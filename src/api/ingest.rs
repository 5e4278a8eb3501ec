use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use super::{rejected, AppState};
use crate::metrics::RequestTimer;
use crate::models::{IngestRequest, IngestResponse};
use crate::Result;

pub async fn ingest_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>> {
    let _timer = RequestTimer::new("ingest");
    let Json(request) = payload.map_err(rejected)?;

    let report = state.ingest.ingest(request.data).await?;
    Ok(Json(IngestResponse {
        message: format!("Successfully ingested {} data points", report.ingested_count),
        ingested_count: report.ingested_count,
    }))
}
