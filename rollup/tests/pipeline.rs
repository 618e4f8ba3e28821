//! Sample-to-aggregate pipeline: a SampleSaved event delivered to the
//! service schedules one job per window kind, and a worker turns the due
//! minute job into the expected statistics.

use std::sync::Arc;

use beacon_rollup::config::RollupConfig;
use beacon_rollup::context::bootstrap;
use beacon_rollup::queue::{DelayQueue, MemoryDelayQueue};
use beacon_rollup::worker::{RollupWorker, WorkerConfig};
use beacon_shared::messages::SampleSaved;
use beacon_shared::protocol::Envelope;
use beacon_shared::types::sample::Sample;
use beacon_store::memory::MemoryTimeSeriesStore;
use beacon_store::TimeSeriesStore;
use chrono::{DateTime, Utc};

fn sample(secs: i64, value: f64) -> Sample {
    Sample {
        device_id: None,
        device: "dev1".to_string(),
        stream: "temp".to_string(),
        timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
        value,
    }
}

#[tokio::test]
async fn test_sample_event_becomes_minute_aggregate() {
    let queue = Arc::new(MemoryDelayQueue::new());
    let series = Arc::new(MemoryTimeSeriesStore::new());
    let app = bootstrap(RollupConfig::default(), queue.clone(), series.clone());

    let window_start = 1_700_000_100;
    for (offset, value) in [(1, 1.0), (20, 2.0), (59, 3.0)] {
        let sample = sample(window_start + offset, value);
        series.insert_sample(&sample).await.unwrap();

        // Deliver through the broker entry point, envelope and all.
        let envelope = Envelope::new(&SampleSaved(sample)).unwrap();
        app.events
            .deliver(&app, &envelope.to_bytes().unwrap())
            .await
            .unwrap();
    }

    // One coalesced job per window kind, not per sample.
    assert_eq!(queue.len().unwrap(), 3);

    // Force the minute job due and drain it.
    let key = format!("{window_start}/minute/dev1/temp");
    assert!(queue.due(&key).is_some());
    queue.upsert(&key, 0).unwrap();

    let worker = RollupWorker::new(
        queue.clone(),
        series.clone(),
        app.config.catalog.clone(),
        WorkerConfig::default(),
    );
    worker.tick().await.unwrap();

    let start = DateTime::from_timestamp(window_start, 0).unwrap();
    let row = series.aggregate("minute", "dev1", "temp", start).unwrap();
    assert_eq!(row.count, 3);
    assert_eq!(row.average, 2.0);
    assert_eq!(row.max, 3.0);
    assert_eq!(row.min, 1.0);

    // The hour and day jobs are still pending, anchored to their own delays.
    assert_eq!(queue.len().unwrap(), 2);
}

#[tokio::test]
async fn test_redelivered_sample_event_is_harmless() {
    let queue = Arc::new(MemoryDelayQueue::new());
    let series = Arc::new(MemoryTimeSeriesStore::new());
    let app = bootstrap(RollupConfig::default(), queue.clone(), series.clone());

    let sample = sample(1_700_000_110, 5.0);
    series.insert_sample(&sample).await.unwrap();

    let envelope = Envelope::new(&SampleSaved(sample)).unwrap();
    let raw = envelope.to_bytes().unwrap();

    // At-least-once: the same message arrives twice.
    app.events.deliver(&app, &raw).await.unwrap();
    app.events.deliver(&app, &raw).await.unwrap();

    // Still one coalesced job per window kind.
    assert_eq!(queue.len().unwrap(), 3);

    let now = Utc::now().timestamp();
    let due = queue.due("1700000100/minute/dev1/temp").unwrap();
    assert!(due >= now + 10 - 5);
    assert!(due <= now + 10 + 1);
}
