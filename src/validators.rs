//! Request-shape checks applied at the service boundary.

use chrono::{DateTime, Utc};

use crate::models::DataPoint;
use crate::{Result, TimeseriesError};

pub const MAX_BATCH_SIZE: usize = 1000;
pub const MAX_METRIC_NAME_LEN: usize = 100;
pub const MAX_QUERY_RANGE_DAYS: i64 = 365;

pub fn validate_timestamp(time: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if time > now {
        return Err(TimeseriesError::Validation(format!(
            "Timestamp cannot be in the future: {}",
            time
        )));
    }
    Ok(())
}

pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TimeseriesError::Validation("Metric name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_METRIC_NAME_LEN {
        return Err(TimeseriesError::Validation(format!(
            "Metric name too long (max {} characters): '{}'",
            MAX_METRIC_NAME_LEN, name
        )));
    }
    Ok(())
}

pub fn validate_data_points(points: &[DataPoint], now: DateTime<Utc>) -> Result<()> {
    if points.is_empty() {
        return Err(TimeseriesError::Validation("No data points provided".to_string()));
    }
    if points.len() > MAX_BATCH_SIZE {
        return Err(TimeseriesError::Validation(format!(
            "Too many data points in single request: {} (max {})",
            points.len(),
            MAX_BATCH_SIZE
        )));
    }
    for point in points {
        validate_timestamp(point.time, now)?;
        validate_metric_name(&point.metric)?;
    }
    Ok(())
}

/// Optional pre-check for queries. The planner itself accepts any range.
pub fn validate_query_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start >= end {
        return Err(TimeseriesError::Validation(format!(
            "Start time must be before end time (start_time={}, end_time={})",
            start, end
        )));
    }
    if (end - start).num_days() > MAX_QUERY_RANGE_DAYS {
        return Err(TimeseriesError::Validation(
            "Query time range cannot exceed 1 year".to_string(),
        ));
    }
    Ok(())
}
