//! Prometheus metrics for the ingest service

use once_cell::sync::Lazy;
use prometheus::{register_counter, Counter, Encoder, TextEncoder};

pub static NOTIFICATIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_notifications_total",
        "Device notifications persisted"
    )
    .unwrap()
});

pub static SAMPLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("beacon_samples_total", "Raw numeric samples persisted").unwrap()
});

pub static STRINGS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("beacon_strings_total", "String values persisted").unwrap()
});

pub static BATCHES_SPLIT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_batches_split_total",
        "Batched notifications split into per-stream commands"
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
