use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Storage, StorageTxn, TxnWork};
use crate::aggregate::BucketFold;
use crate::interval::Interval;
use crate::models::{Aggregation, Bucket, Metric, MetricId, MetricRef, Sample, SampleValue, ValueKind};
use crate::{Result, TimeseriesError};

// Times are stored as microseconds since the Unix epoch.
const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS metrics_id_seq START 1;
    CREATE TABLE IF NOT EXISTS metrics (
        id BIGINT PRIMARY KEY DEFAULT nextval('metrics_id_seq'),
        name VARCHAR NOT NULL UNIQUE,
        first_seen BIGINT NOT NULL,
        last_seen BIGINT NOT NULL,
        value_type VARCHAR NOT NULL CHECK (value_type IN ('number', 'string'))
    );
    CREATE TABLE IF NOT EXISTS time_series_data (
        time_us BIGINT NOT NULL,
        metric_id BIGINT NOT NULL,
        value DOUBLE,
        text_value VARCHAR,
        CHECK ((value IS NULL) != (text_value IS NULL))
    );
    CREATE INDEX IF NOT EXISTS idx_time_series_data_metric_time
        ON time_series_data (metric_id, time_us);
";

/// Storage engine backed by an embedded DuckDB database.
///
/// All statements run on one connection on the blocking pool, which
/// serialises writers; the mutex is never held across an `.await`.
#[derive(Clone)]
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening duckdb database");
        Self::init(Connection::open(path)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| TimeseriesError::Internal(format!("storage task failed: {}", e)))?
    }
}

fn to_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| TimeseriesError::Storage(format!("timestamp out of range: {}", micros)))
}

fn parse_kind(raw: &str) -> Result<ValueKind> {
    ValueKind::parse(raw).ok_or_else(|| TimeseriesError::Storage(format!("unknown value_type '{}'", raw)))
}

fn sample_value(number: Option<f64>, text: Option<String>) -> Result<SampleValue> {
    match (number, text) {
        (Some(number), None) => Ok(SampleValue::Number(number)),
        (None, Some(text)) => Ok(SampleValue::Text(text)),
        _ => Err(TimeseriesError::Storage(
            "sample row must populate exactly one of value and text_value".to_string(),
        )),
    }
}

/// Feeds every sample of `metric_id` with `start <= time_us <= end` to
/// `visit`, oldest first, without collecting them. Returns the row count.
fn scan_range<F>(conn: &Connection, metric_id: MetricId, start: i64, end: i64, mut visit: F) -> Result<usize>
where
    F: FnMut(DateTime<Utc>, SampleValue) -> Result<()>,
{
    let mut stmt = conn.prepare(
        "SELECT time_us, value, text_value
         FROM time_series_data
         WHERE metric_id = ? AND time_us BETWEEN ? AND ?
         ORDER BY time_us, rowid",
    )?;
    let rows = stmt.query_map(params![metric_id.0, start, end], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<f64>>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut count = 0;
    for row in rows {
        let (time, number, text) = row?;
        visit(from_micros(time)?, sample_value(number, text)?)?;
        count += 1;
    }
    Ok(count)
}

struct DuckDbTxn<'a> {
    conn: &'a Connection,
}

impl StorageTxn for DuckDbTxn<'_> {
    fn metric_kind(&mut self, name: &str) -> Result<Option<ValueKind>> {
        let mut stmt = self.conn.prepare("SELECT value_type FROM metrics WHERE name = ?")?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(parse_kind(&raw)?))
            }
            None => Ok(None),
        }
    }

    fn upsert_metric(&mut self, name: &str, kind: ValueKind, seen: DateTime<Utc>) -> Result<MetricId> {
        let seen = to_micros(seen);
        self.conn.execute(
            "INSERT INTO metrics (name, first_seen, last_seen, value_type)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (name) DO UPDATE SET
                last_seen = greatest(last_seen, excluded.last_seen),
                value_type = excluded.value_type",
            params![name, seen, seen, kind.as_str()],
        )?;

        let mut stmt = self.conn.prepare("SELECT id FROM metrics WHERE name = ?")?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => Ok(MetricId(row.get(0)?)),
            None => Err(TimeseriesError::Storage(format!(
                "metric '{}' missing after upsert",
                name
            ))),
        }
    }

    fn append(&mut self, metric_id: MetricId, time: DateTime<Utc>, value: &SampleValue) -> Result<()> {
        let time = to_micros(time);
        match value {
            SampleValue::Number(number) => self.conn.execute(
                "INSERT INTO time_series_data (time_us, metric_id, value) VALUES (?, ?, ?)",
                params![time, metric_id.0, *number],
            )?,
            SampleValue::Text(text) => self.conn.execute(
                "INSERT INTO time_series_data (time_us, metric_id, text_value) VALUES (?, ?, ?)",
                params![time, metric_id.0, text.as_str()],
            )?,
        };
        Ok(())
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn lookup_metric(&self, name: &str) -> Result<Option<MetricRef>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT id, value_type FROM metrics WHERE name = ?")?;
            let mut rows = stmt.query(params![name])?;
            match rows.next()? {
                Some(row) => {
                    let id: i64 = row.get(0)?;
                    let raw: String = row.get(1)?;
                    Ok(Some(MetricRef {
                        id: MetricId(id),
                        value_kind: parse_kind(&raw)?,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, value_type, first_seen, last_seen
                 FROM metrics
                 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;

            let mut metrics = Vec::new();
            for row in rows {
                let (id, name, kind, first_seen, last_seen) = row?;
                metrics.push(Metric {
                    id: MetricId(id),
                    name,
                    value_kind: parse_kind(&kind)?,
                    first_seen: from_micros(first_seen)?,
                    last_seen: from_micros(last_seen)?,
                });
            }
            Ok(metrics)
        })
        .await
    }

    async fn range(&self, metric_id: MetricId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Sample>> {
        let (start, end) = (to_micros(start), to_micros(end));
        self.with_conn(move |conn| {
            let mut samples = Vec::new();
            scan_range(conn, metric_id, start, end, |time, value| {
                samples.push(Sample { time, value });
                Ok(())
            })?;
            debug!(metric_id = metric_id.0, rows = samples.len(), "range scan");
            Ok(samples)
        })
        .await
    }

    async fn bucketed_aggregate(
        &self,
        metric_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        aggregation: Aggregation,
    ) -> Result<Vec<Bucket>> {
        let (start, end) = (to_micros(start), to_micros(end));
        self.with_conn(move |conn| {
            let mut fold = BucketFold::new(interval, aggregation);
            let rows = scan_range(conn, metric_id, start, end, |time, value| fold.push(time, &value))?;
            let buckets = fold.finish();
            debug!(
                metric_id = metric_id.0,
                rows,
                buckets = buckets.len(),
                interval = %interval,
                "bucketed scan"
            );
            Ok(buckets)
        })
        .await
    }

    async fn transaction(&self, work: TxnWork) -> Result<usize> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let written = work(&mut DuckDbTxn { conn: &*tx })?;
            tx.commit()?;
            Ok(written)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1")?;
            let mut rows = stmt.query(params![])?;
            rows.next()?;
            Ok(())
        })
        .await
    }
}
