use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::debug;

use super::{rejected, AppState};
use crate::metrics::RequestTimer;
use crate::models::{QueryPoint, QuerySpec};
use crate::validators;
use crate::Result;

pub async fn query_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<QuerySpec>, JsonRejection>,
) -> Result<Json<Vec<QueryPoint>>> {
    let _timer = RequestTimer::new("query");
    let Json(spec) = payload.map_err(rejected)?;
    debug!(metric = %spec.metric, aggregation = ?spec.aggregation, interval = ?spec.interval, "query request");

    if state.strict_query_ranges {
        validators::validate_query_time_range(spec.start, spec.end)?;
    }

    Ok(Json(state.queries.query(&spec).await?))
}
