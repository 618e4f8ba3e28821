//! Notification-to-sample pipeline: a CreateNotification command flows
//! through the command loop and the event fan-out into the stores, with
//! numeric and string values landing in their separate paths.

use std::sync::Arc;
use std::time::Duration;

use beacon_bus::LocalBroker;
use beacon_ingest::config::IngestConfig;
use beacon_ingest::context::{bootstrap, App, Stores};
use beacon_shared::messages::CreateNotification;
use beacon_shared::types::device::Device;
use beacon_shared::types::notification::{KIND_STREAM, KIND_STREAM_BATCH};
use beacon_store::memory::{
    MemoryDeviceDirectory, MemoryLastValueStore, MemoryNotificationStore, MemoryTimeSeriesStore,
};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

struct Harness {
    app: Arc<App>,
    series: Arc<MemoryTimeSeriesStore>,
    notifications: Arc<MemoryNotificationStore>,
    last_values: Arc<MemoryLastValueStore>,
    command_loop: JoinHandle<()>,
}

fn harness() -> Harness {
    let devices = MemoryDeviceDirectory::new();
    devices.insert(Device {
        id: 1,
        guid: "dev1".to_string(),
        name: None,
    });

    let series = Arc::new(MemoryTimeSeriesStore::new());
    let notifications = Arc::new(MemoryNotificationStore::new());
    let last_values = Arc::new(MemoryLastValueStore::new());

    let mut config = IngestConfig::default();
    config.export_topics.clear();

    let app = bootstrap(
        config,
        Arc::new(LocalBroker::new()),
        Stores {
            devices: Arc::new(devices),
            notifications: notifications.clone(),
            last_values: last_values.clone(),
            series: series.clone(),
        },
    );

    let command_loop = {
        let commands = app.commands.clone();
        let ctx = app.clone();
        tokio::spawn(async move {
            let _ = commands.run(ctx).await;
        })
    };

    Harness {
        app,
        series,
        notifications,
        last_values,
        command_loop,
    }
}

async fn settle<F: Fn() -> bool>(done: F, what: &str) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

#[tokio::test]
async fn test_numeric_stream_notification_becomes_sample() {
    let h = harness();

    h.app
        .commands
        .create(CreateNotification {
            id: 100,
            device_guid: "dev1".to_string(),
            notification: KIND_STREAM.to_string(),
            timestamp: ts(1_700_000_000),
            parameters: serde_json::json!({
                "code": "temp",
                "timestamp": ts(1_700_000_000),
                "value": 21.5,
            }),
        })
        .await
        .unwrap();

    settle(|| h.series.samples().len() == 1, "sample write").await;

    let notifications = h.notifications.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].id, 100);
    assert_eq!(notifications[0].device_id, 1);

    let samples = h.series.samples();
    assert_eq!(samples[0].device, "dev1");
    assert_eq!(samples[0].stream, "temp");
    assert_eq!(samples[0].value, 21.5);

    let last = h.last_values.get(1, "temp").unwrap();
    assert_eq!(last.value, serde_json::json!(21.5));

    // Numeric values never reach the string store.
    assert!(h.series.strings().is_empty());
    h.command_loop.abort();
}

#[tokio::test]
async fn test_string_stream_notification_goes_to_string_store_only() {
    let h = harness();

    h.app
        .commands
        .create(CreateNotification {
            id: 101,
            device_guid: "dev1".to_string(),
            notification: KIND_STREAM.to_string(),
            timestamp: ts(1_700_000_000),
            parameters: serde_json::json!({
                "code": "fw_version",
                "timestamp": ts(1_700_000_000),
                "value": "1.2.3",
            }),
        })
        .await
        .unwrap();

    settle(|| !h.series.strings().is_empty(), "string write").await;

    let strings = h.series.strings();
    assert_eq!(strings.len(), 1);
    assert_eq!(strings[0].stream, "fw_version");
    assert_eq!(strings[0].value, "1.2.3");

    // String values never reach the numeric sample path.
    assert!(h.series.samples().is_empty());
    h.command_loop.abort();
}

#[tokio::test]
async fn test_batch_notification_splits_into_streams() {
    let h = harness();

    h.app
        .commands
        .create(CreateNotification {
            id: 102,
            device_guid: "dev1".to_string(),
            notification: KIND_STREAM_BATCH.to_string(),
            timestamp: ts(1_700_000_000),
            parameters: serde_json::json!([
                { "code": "temp", "timestamp": ts(1_700_000_000), "value": 20.0 },
                { "code": "humidity", "timestamp": ts(1_700_000_001), "value": 55.0 },
                { "code": "fw_version", "timestamp": ts(1_700_000_001), "value": "2.0.0" },
            ]),
        })
        .await
        .unwrap();

    settle(
        || h.series.samples().len() == 2 && h.series.strings().len() == 1,
        "batch split",
    )
    .await;

    // One batch notification plus one per-stream notification each.
    assert_eq!(h.notifications.notifications().len(), 4);

    let mut streams: Vec<String> = h.series.samples().iter().map(|s| s.stream.clone()).collect();
    streams.sort();
    assert_eq!(streams, vec!["humidity", "temp"]);
    assert_eq!(h.series.strings()[0].stream, "fw_version");
    h.command_loop.abort();
}

#[tokio::test]
async fn test_missing_timestamp_defaults_to_notification_time() {
    let h = harness();

    h.app
        .commands
        .create(CreateNotification {
            id: 103,
            device_guid: "dev1".to_string(),
            notification: KIND_STREAM.to_string(),
            timestamp: ts(1_700_000_042),
            parameters: serde_json::json!({
                "code": "temp",
                "value": 3.5,
            }),
        })
        .await
        .unwrap();

    settle(|| h.series.samples().len() == 1, "sample write").await;

    assert_eq!(h.series.samples()[0].timestamp, ts(1_700_000_042));
    h.command_loop.abort();
}

#[tokio::test]
async fn test_unknown_device_drops_command() {
    let h = harness();

    h.app
        .commands
        .create(CreateNotification {
            id: 104,
            device_guid: "ghost".to_string(),
            notification: KIND_STREAM.to_string(),
            timestamp: ts(1_700_000_000),
            parameters: serde_json::json!({ "code": "temp", "value": 1.0 }),
        })
        .await
        .unwrap();

    // The command is logged and dropped; nothing is persisted and the loop
    // keeps serving later commands.
    h.app
        .commands
        .create(CreateNotification {
            id: 105,
            device_guid: "dev1".to_string(),
            notification: KIND_STREAM.to_string(),
            timestamp: ts(1_700_000_000),
            parameters: serde_json::json!({ "code": "temp", "value": 2.0 }),
        })
        .await
        .unwrap();

    settle(|| h.series.samples().len() == 1, "second command").await;
    assert_eq!(h.notifications.notifications().len(), 1);
    assert_eq!(h.notifications.notifications()[0].id, 105);
    h.command_loop.abort();
}
