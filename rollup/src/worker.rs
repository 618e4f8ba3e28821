//! Rollup worker
//!
//! Drains due jobs from the delay queue and turns each into one window
//! statistic: count, average, max and min over the raw numeric samples in
//! `[window_start, window_start + duration)`. A window with no samples
//! produces nothing and is not re-queued. A failed aggregate write is an
//! invariant violation: the job is already gone from the queue.

use std::sync::Arc;
use std::time::Duration;

use beacon_shared::error::{FatalError, ValidationError};
use beacon_shared::types::sample::{Aggregate, Sample};
use beacon_shared::types::window::WindowCatalog;
use beacon_store::TimeSeriesStore;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::metrics;
use crate::queue::DelayQueue;
use crate::scheduler::JobKey;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs claimed per poll
    pub max_pop: usize,

    /// Sleep between polls when nothing is due
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_pop: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Drains the delay queue and writes window statistics. Several workers may
/// run against one queue; `pop_due` hands each job to exactly one of them.
pub struct RollupWorker {
    queue: Arc<dyn DelayQueue>,
    series: Arc<dyn TimeSeriesStore>,
    catalog: WindowCatalog,
    config: WorkerConfig,
}

impl RollupWorker {
    pub fn new(
        queue: Arc<dyn DelayQueue>,
        series: Arc<dyn TimeSeriesStore>,
        catalog: WindowCatalog,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            series,
            catalog,
            config,
        }
    }

    /// Claim and process everything currently due. Returns the number of
    /// jobs claimed. Bad keys, empty windows and transient read failures are
    /// handled inline; only invariant violations bubble out.
    pub async fn tick(&self) -> Result<usize, FatalError> {
        let now = Utc::now().timestamp();
        let due = match self.queue.pop_due(now, self.config.max_pop) {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "delay queue pop failed");
                return Ok(0);
            }
        };

        for key in &due {
            metrics::JOBS_CLAIMED.inc();
            self.process(key).await?;
        }
        if let Ok(depth) = self.queue.len() {
            metrics::QUEUE_DEPTH.set(depth as f64);
        }
        Ok(due.len())
    }

    /// Run until a fatal invariant violation. Sleeps between polls whenever
    /// nothing was due.
    pub async fn run(&self) -> Result<(), FatalError> {
        loop {
            if self.tick().await? == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    async fn process(&self, raw: &str) -> Result<(), FatalError> {
        let job = match JobKey::parse(raw) {
            Ok(job) => job,
            Err(err) => {
                error!(key = raw, error = %err, "dropping malformed job");
                metrics::JOBS_DROPPED.inc();
                return Ok(());
            }
        };

        let Some(window) = self.catalog.get(&job.kind) else {
            error!(
                key = raw,
                error = %ValidationError::UnknownWindowKind(job.kind.clone()),
                "dropping job"
            );
            metrics::JOBS_DROPPED.inc();
            return Ok(());
        };

        let Some(from) = DateTime::from_timestamp(job.window_start, 0) else {
            error!(key = raw, "dropping job with out-of-range window start");
            metrics::JOBS_DROPPED.inc();
            return Ok(());
        };
        let to = DateTime::from_timestamp(
            job.window_start + window.duration.as_secs() as i64,
            0,
        )
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let samples = match self
            .series
            .query_range(&job.device, &job.stream, from, to)
            .await
        {
            Ok(samples) => samples,
            Err(err) => {
                // Nothing has been written yet, so the job can be re-queued
                // for the next cycle instead of losing the window.
                warn!(key = raw, error = %err, "sample query failed, re-queuing job");
                let due = Utc::now().timestamp() + window.schedule_delay.as_secs() as i64;
                if let Err(err) = self.queue.upsert(raw, due) {
                    error!(key = raw, error = %err, "re-queue failed, dropping job");
                    metrics::JOBS_DROPPED.inc();
                }
                return Ok(());
            }
        };

        if samples.is_empty() {
            debug!(key = raw, "no samples in window, skipping");
            metrics::EMPTY_WINDOWS.inc();
            return Ok(());
        }

        let aggregate = summarize(&job, from, &samples);
        debug!(
            key = raw,
            count = aggregate.count,
            average = aggregate.average,
            max = aggregate.max,
            min = aggregate.min,
            "writing rollup"
        );

        if let Err(err) = self.series.insert_aggregate(&job.kind, &aggregate).await {
            return Err(FatalError::AggregateWrite {
                key: raw.to_string(),
                kind: job.kind,
                source: err,
            });
        }
        metrics::AGGREGATES_WRITTEN.inc();
        Ok(())
    }
}

/// Count, average, max and min over one window's samples.
fn summarize(job: &JobKey, window_start: DateTime<Utc>, samples: &[Sample]) -> Aggregate {
    let count = samples.len() as u64;
    let sum: f64 = samples.iter().map(|s| s.value).sum();
    let max = samples.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max);
    let min = samples.iter().map(|s| s.value).fold(f64::INFINITY, f64::min);

    Aggregate {
        device: job.device.clone(),
        stream: job.stream.clone(),
        window_start,
        average: sum / count as f64,
        max,
        min,
        count,
    }
}
