use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref SERVICE_UP: IntGauge = register_int_gauge!(
        "timeseries_service_up",
        "Whether the service is up (1) or down (0)"
    ).unwrap();

    // Request metrics
    pub static ref REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "timeseries_requests_total",
        "Total number of requests received",
        &["endpoint"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "timeseries_request_duration_seconds",
        "Request duration in seconds",
        &["endpoint"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();

    // Ingest metrics
    pub static ref POINTS_INGESTED: IntCounter = register_int_counter!(
        "timeseries_points_ingested_total",
        "Total number of data points written"
    ).unwrap();

    pub static ref INGEST_FAILURES: IntCounter = register_int_counter!(
        "timeseries_ingest_failures_total",
        "Total number of ingest batches rolled back"
    ).unwrap();

    // Query metrics
    pub static ref QUERIES: IntCounterVec = register_int_counter_vec!(
        "timeseries_queries_total",
        "Queries executed against storage, by plan shape",
        &["plan"]
    ).unwrap();

    // Cache metrics
    pub static ref CACHE_HITS: IntCounter = register_int_counter!(
        "timeseries_cache_hits_total",
        "Queries served from the result cache"
    ).unwrap();

    pub static ref CACHE_MISSES: IntCounter = register_int_counter!(
        "timeseries_cache_misses_total",
        "Queries not found in the result cache"
    ).unwrap();

    pub static ref CACHE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "timeseries_cache_errors_total",
        "Cache operations that failed and were ignored",
        &["op"]
    ).unwrap();

    pub static ref CACHE_INVALIDATED_KEYS: IntCounter = register_int_counter!(
        "timeseries_cache_invalidated_keys_total",
        "Cache entries removed by invalidation"
    ).unwrap();
}

pub fn init_metrics() {
    SERVICE_UP.set(1);
}

/// Counts a request on creation and records its duration when dropped.
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: &'static str) -> Self {
        REQUEST_COUNTER.with_label_values(&[endpoint]).inc();
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        REQUEST_DURATION
            .with_label_values(&[self.endpoint])
            .observe(duration);
    }
}

pub fn record_points_ingested(count: usize) {
    POINTS_INGESTED.inc_by(count as u64);
}

pub fn record_ingest_failure() {
    INGEST_FAILURES.inc();
}

pub fn record_query(plan: &str) {
    QUERIES.with_label_values(&[plan]).inc();
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
