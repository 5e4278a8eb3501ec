use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeseriesError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid interval '{interval}'. Must be one of: {allowed}")]
    InvalidInterval { interval: String, allowed: String },

    #[error("Aggregation is only supported for numeric metrics ('{metric}' stores text, requested {aggregation})")]
    UnsupportedAggregation { metric: String, aggregation: String },

    #[error("Metric '{0}' not found")]
    MetricNotFound(String),

    #[error("Database error: {0}")]
    Storage(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TimeseriesError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TimeseriesError::Validation(_)
            | TimeseriesError::InvalidInterval { .. }
            | TimeseriesError::UnsupportedAggregation { .. } => StatusCode::BAD_REQUEST,
            TimeseriesError::MetricNotFound(_) => StatusCode::NOT_FOUND,
            TimeseriesError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TimeseriesError::Storage(_)
            | TimeseriesError::Config(_)
            | TimeseriesError::Serialization(_)
            | TimeseriesError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the caller sent something we refuse to process.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<duckdb::Error> for TimeseriesError {
    fn from(err: duckdb::Error) -> Self {
        TimeseriesError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TimeseriesError {
    fn from(err: serde_json::Error) -> Self {
        TimeseriesError::Serialization(err.to_string())
    }
}

impl IntoResponse for TimeseriesError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TimeseriesError>;
