//! ClickHouse time-series backend
//!
//! Raw samples and string values are buffered in memory and flushed in bulk
//! by a background task for throughput; queries flush first so they see
//! recent data. Aggregates are written directly, not buffered: once a rollup
//! job is claimed a failed write must surface immediately, and the per-kind
//! ReplacingMergeTree tables give the required upsert semantics.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_shared::error::StoreError;
use beacon_shared::types::sample::{Aggregate, Sample, StringSample};
use beacon_shared::types::window::WindowCatalog;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics;

const SAMPLES_TABLE: &str = "samples";
const STRINGS_TABLE: &str = "stream_strings";

/// Flush when this many rows are buffered.
const FLUSH_THRESHOLD: usize = 500;
/// Flush at least this often.
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// One row in the raw samples table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct SampleRow {
    device: String,
    stream: String,
    /// Milliseconds since Unix epoch (ClickHouse DateTime64(3))
    ts_ms: i64,
    value: f64,
}

/// One row in the string values table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct StringRow {
    device: String,
    stream: String,
    ts_ms: i64,
    value: String,
}

/// One row in a per-kind rollup table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
struct AggregateRow {
    device: String,
    stream: String,
    /// Window start, seconds since Unix epoch
    window_start: i64,
    average: f64,
    max: f64,
    min: f64,
    count: u64,
}

/// ClickHouse-backed time-series store.
pub struct ClickHouseStore {
    client: Client,
    pending_samples: Arc<AsyncMutex<Vec<SampleRow>>>,
    pending_strings: Arc<AsyncMutex<Vec<StringRow>>>,
    cancel: CancellationToken,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    /// Wakes the background flush task early when the threshold is reached.
    flush_notify: Arc<tokio::sync::Notify>,
}

impl ClickHouseStore {
    /// Connect, create missing tables (one rollup table per catalogue kind)
    /// and start the background flush task.
    pub async fn new(
        endpoint: &str,
        database: &str,
        catalog: &WindowCatalog,
    ) -> anyhow::Result<Self> {
        let mut client = Client::default()
            .with_url(endpoint)
            .with_database(database)
            .with_option("connect_timeout", "10")
            .with_option("receive_timeout", "30");
        if let Ok(password) = std::env::var("BEACON_CLICKHOUSE_PASSWORD") {
            client = client.with_user("default").with_password(password);
        }

        let store = Self {
            client,
            pending_samples: Arc::new(AsyncMutex::new(Vec::new())),
            pending_strings: Arc::new(AsyncMutex::new(Vec::new())),
            cancel: CancellationToken::new(),
            flush_handle: Mutex::new(None),
            flush_notify: Arc::new(tokio::sync::Notify::new()),
        };

        store.ensure_tables(catalog).await?;
        store.spawn_flush_task();
        Ok(store)
    }

    async fn ensure_tables(&self, catalog: &WindowCatalog) -> anyhow::Result<()> {
        let samples_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {SAMPLES_TABLE} (
                device String,
                stream String,
                ts_ms Int64,
                value Float64
            ) ENGINE = MergeTree()
            PARTITION BY toYYYYMM(fromUnixTimestamp64Milli(ts_ms))
            ORDER BY (device, stream, ts_ms)"
        );
        self.client.query(&samples_ddl).execute().await?;

        let strings_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {STRINGS_TABLE} (
                device String,
                stream String,
                ts_ms Int64,
                value String
            ) ENGINE = MergeTree()
            PARTITION BY toYYYYMM(fromUnixTimestamp64Milli(ts_ms))
            ORDER BY (device, stream, ts_ms)"
        );
        self.client.query(&strings_ddl).execute().await?;

        for kind in catalog.kinds() {
            let rollup_ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    device String,
                    stream String,
                    window_start Int64,
                    average Float64,
                    max Float64,
                    min Float64,
                    count UInt64
                ) ENGINE = ReplacingMergeTree()
                ORDER BY (device, stream, window_start)",
                rollup_table(kind)
            );
            self.client.query(&rollup_ddl).execute().await?;
        }
        Ok(())
    }

    /// Flush all pending sample and string rows in bulk inserts.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let samples = {
            let mut pending = self.pending_samples.lock().await;
            std::mem::take(&mut *pending)
        };
        let strings = {
            let mut pending = self.pending_strings.lock().await;
            std::mem::take(&mut *pending)
        };
        metrics::CH_PENDING_ROWS.set(0.0);

        let total = samples.len() + strings.len();
        if total == 0 {
            return Ok(());
        }

        let result = async {
            Self::flush_rows(&self.client, SAMPLES_TABLE, &samples).await?;
            Self::flush_rows(&self.client, STRINGS_TABLE, &strings).await
        }
        .await;

        match result {
            Ok(()) => {
                metrics::CH_FLUSH_TOTAL.with_label_values(&["ok"]).inc();
                metrics::CH_FLUSH_ROWS.inc_by(total as f64);
                tracing::debug!("flushed {} rows to ClickHouse", total);
                Ok(())
            }
            Err(err) => {
                metrics::CH_FLUSH_TOTAL.with_label_values(&["error"]).inc();
                Err(StoreError::Transient(format!("clickhouse flush: {err}")))
            }
        }
    }

    /// Background task flushing on a timer, on threshold notification and
    /// once more at shutdown. Failed flushes are re-queued.
    fn spawn_flush_task(&self) {
        let pending_samples = self.pending_samples.clone();
        let pending_strings = self.pending_strings.clone();
        let client = self.client.clone();
        let cancel = self.cancel.clone();
        let notify = self.flush_notify.clone();

        async fn do_flush(
            pending_samples: &AsyncMutex<Vec<SampleRow>>,
            pending_strings: &AsyncMutex<Vec<StringRow>>,
            client: &Client,
            label: &str,
        ) {
            let samples = {
                let mut p = pending_samples.lock().await;
                std::mem::take(&mut *p)
            };
            let strings = {
                let mut p = pending_strings.lock().await;
                std::mem::take(&mut *p)
            };
            metrics::CH_PENDING_ROWS.set(0.0);
            let total = samples.len() + strings.len();
            if total == 0 {
                return;
            }

            let result = async {
                ClickHouseStore::flush_rows(client, SAMPLES_TABLE, &samples).await?;
                ClickHouseStore::flush_rows(client, STRINGS_TABLE, &strings).await
            }
            .await;

            match result {
                Ok(()) => {
                    metrics::CH_FLUSH_TOTAL.with_label_values(&["ok"]).inc();
                    metrics::CH_FLUSH_ROWS.inc_by(total as f64);
                    tracing::debug!("{}: {} rows to ClickHouse", label, total);
                }
                Err(err) => {
                    metrics::CH_FLUSH_TOTAL.with_label_values(&["error"]).inc();
                    tracing::warn!("{} failed ({} rows), re-queuing: {:#}", label, total, err);
                    let mut p = pending_samples.lock().await;
                    p.extend(samples);
                    let mut q = pending_strings.lock().await;
                    q.extend(strings);
                    metrics::CH_PENDING_ROWS.set((p.len() + q.len()) as f64);
                }
            }
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        do_flush(&pending_samples, &pending_strings, &client, "timer flush").await;
                    }
                    _ = notify.notified() => {
                        do_flush(&pending_samples, &pending_strings, &client, "threshold flush").await;
                    }
                    _ = cancel.cancelled() => {
                        do_flush(&pending_samples, &pending_strings, &client, "shutdown flush").await;
                        break;
                    }
                }
            }
        });
        if let Ok(mut guard) = self.flush_handle.lock() {
            *guard = Some(handle);
        }
    }

    /// Gracefully shut down: stop the flush task, then flush the remainder.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.cancel.cancel();
        let handle = {
            let mut guard = self
                .flush_handle
                .lock()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            guard.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.flush().await
    }

    async fn flush_rows<R: Row + Serialize>(
        client: &Client,
        table: &str,
        rows: &[R],
    ) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = client.insert(table)?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }
}

fn rollup_table(kind: &str) -> String {
    format!("samples_{kind}")
}

#[async_trait]
impl super::TimeSeriesStore for ClickHouseStore {
    async fn insert_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        let row = SampleRow {
            device: sample.device.clone(),
            stream: sample.stream.clone(),
            ts_ms: sample.timestamp.timestamp_millis(),
            value: sample.value,
        };
        let pending = {
            let mut pending = self.pending_samples.lock().await;
            pending.push(row);
            pending.len()
        };
        metrics::CH_PENDING_ROWS.set(pending as f64);
        if pending >= FLUSH_THRESHOLD {
            self.flush_notify.notify_one();
        }
        Ok(())
    }

    async fn insert_string(&self, sample: &StringSample) -> Result<(), StoreError> {
        let row = StringRow {
            device: sample.device.clone(),
            stream: sample.stream.clone(),
            ts_ms: sample.timestamp.timestamp_millis(),
            value: sample.value.clone(),
        };
        let pending = {
            let mut pending = self.pending_strings.lock().await;
            pending.push(row);
            pending.len()
        };
        if pending >= FLUSH_THRESHOLD {
            self.flush_notify.notify_one();
        }
        Ok(())
    }

    async fn query_range(
        &self,
        device: &str,
        stream: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        // Flush first so the query sees rows that are still buffered.
        self.flush().await?;

        let sql = format!(
            "SELECT device, stream, ts_ms, value FROM {SAMPLES_TABLE} \
             WHERE device = ? AND stream = ? AND ts_ms >= ? AND ts_ms < ? \
             ORDER BY ts_ms"
        );
        let mut cursor = self
            .client
            .query(&sql)
            .bind(device)
            .bind(stream)
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch::<SampleRow>()
            .map_err(|e| StoreError::Transient(format!("clickhouse query: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = cursor
            .next()
            .await
            .map_err(|e| StoreError::Transient(format!("clickhouse fetch: {e}")))?
        {
            let timestamp = DateTime::from_timestamp_millis(row.ts_ms)
                .ok_or_else(|| StoreError::Backend(format!("bad timestamp {}", row.ts_ms)))?;
            out.push(Sample {
                device_id: None,
                device: row.device,
                stream: row.stream,
                timestamp,
                value: row.value,
            });
        }
        Ok(out)
    }

    async fn insert_aggregate(&self, kind: &str, aggregate: &Aggregate) -> Result<(), StoreError> {
        let row = AggregateRow {
            device: aggregate.device.clone(),
            stream: aggregate.stream.clone(),
            window_start: aggregate.window_start.timestamp(),
            average: aggregate.average,
            max: aggregate.max,
            min: aggregate.min,
            count: aggregate.count,
        };
        Self::flush_rows(&self.client, &rollup_table(kind), std::slice::from_ref(&row))
            .await
            .map_err(|e| StoreError::Backend(format!("clickhouse aggregate insert: {e}")))?;
        metrics::CH_AGGREGATE_WRITES.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_table_names() {
        assert_eq!(rollup_table("minute"), "samples_minute");
        assert_eq!(rollup_table("day"), "samples_day");
    }
}
