//! Prometheus metrics for the rollup service

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_gauge, Counter, Encoder, Gauge, TextEncoder};

pub static JOBS_SCHEDULED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_rollup_jobs_scheduled_total",
        "Scheduling calls accepted (upserts into the delay queue)"
    )
    .unwrap()
});

pub static JOBS_CLAIMED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_rollup_jobs_claimed_total",
        "Due jobs claimed by workers"
    )
    .unwrap()
});

pub static JOBS_DROPPED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_rollup_jobs_dropped_total",
        "Jobs dropped for malformed keys or unknown window kinds"
    )
    .unwrap()
});

pub static EMPTY_WINDOWS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_rollup_empty_windows_total",
        "Claimed jobs whose window held no samples"
    )
    .unwrap()
});

pub static AGGREGATES_WRITTEN: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_rollup_aggregates_written_total",
        "Aggregate rows written"
    )
    .unwrap()
});

pub static QUEUE_DEPTH: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "beacon_rollup_queue_depth",
        "Jobs currently pending in the delay queue"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
