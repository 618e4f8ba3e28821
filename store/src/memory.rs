//! In-memory store implementations
//!
//! Thread-safe collections behind the collaborator traits; enough for tests
//! and single-node runs. Readers get clones, so nothing borrows into the
//! locked state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use beacon_shared::error::StoreError;
use beacon_shared::types::device::{Device, DeviceId};
use beacon_shared::types::notification::Notification;
use beacon_shared::types::sample::{Aggregate, Sample, StringSample};
use beacon_shared::types::stream::StreamReading;
use chrono::{DateTime, Utc};

fn lock_err(what: &str) -> StoreError {
    StoreError::Backend(format!("{what} lock poisoned"))
}

/// In-memory time-series store.
#[derive(Debug, Default)]
pub struct MemoryTimeSeriesStore {
    samples: RwLock<Vec<Sample>>,
    strings: RwLock<Vec<StringSample>>,
    /// Keyed by (kind, device, stream, window start unix seconds)
    aggregates: RwLock<HashMap<(String, String, String, i64), Aggregate>>,
}

impl MemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored string samples, for tests and debugging.
    pub fn strings(&self) -> Vec<StringSample> {
        self.strings.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Snapshot of all stored raw samples.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Look up one aggregate row.
    pub fn aggregate(
        &self,
        kind: &str,
        device: &str,
        stream: &str,
        window_start: DateTime<Utc>,
    ) -> Option<Aggregate> {
        self.aggregates.read().ok()?.get(&(
            kind.to_string(),
            device.to_string(),
            stream.to_string(),
            window_start.timestamp(),
        )).cloned()
    }

    /// Total number of aggregate rows across all kinds.
    pub fn aggregate_count(&self) -> usize {
        self.aggregates.read().map(|a| a.len()).unwrap_or(0)
    }
}

#[async_trait]
impl super::TimeSeriesStore for MemoryTimeSeriesStore {
    async fn insert_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut samples = self.samples.write().map_err(|_| lock_err("samples"))?;
        samples.push(sample.clone());
        Ok(())
    }

    async fn insert_string(&self, sample: &StringSample) -> Result<(), StoreError> {
        let mut strings = self.strings.write().map_err(|_| lock_err("strings"))?;
        strings.push(sample.clone());
        Ok(())
    }

    async fn query_range(
        &self,
        device: &str,
        stream: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        let samples = self.samples.read().map_err(|_| lock_err("samples"))?;
        Ok(samples
            .iter()
            .filter(|s| {
                s.device == device && s.stream == stream && s.timestamp >= from && s.timestamp < to
            })
            .cloned()
            .collect())
    }

    async fn insert_aggregate(&self, kind: &str, aggregate: &Aggregate) -> Result<(), StoreError> {
        let mut aggregates = self.aggregates.write().map_err(|_| lock_err("aggregates"))?;
        aggregates.insert(
            (
                kind.to_string(),
                aggregate.device.clone(),
                aggregate.stream.clone(),
                aggregate.window_start.timestamp(),
            ),
            aggregate.clone(),
        );
        Ok(())
    }
}

/// In-memory device directory, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct MemoryDeviceDirectory {
    devices: RwLock<Vec<Device>>,
}

impl MemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON array of devices.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let devices: Vec<Device> = serde_json::from_slice(&raw)?;
        Ok(Self {
            devices: RwLock::new(devices),
        })
    }

    pub fn insert(&self, device: Device) {
        if let Ok(mut devices) = self.devices.write() {
            devices.push(device);
        }
    }
}

#[async_trait]
impl super::DeviceDirectory for MemoryDeviceDirectory {
    async fn get_by_guid(&self, guid: &str) -> Result<Device, StoreError> {
        let devices = self.devices.read().map_err(|_| lock_err("devices"))?;
        devices
            .iter()
            .find(|d| d.guid == guid)
            .cloned()
            .ok_or_else(|| StoreError::DeviceNotFound(guid.to_string()))
    }

    async fn get_by_id(&self, id: DeviceId) -> Result<Device, StoreError> {
        let devices = self.devices.read().map_err(|_| lock_err("devices"))?;
        devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))
    }
}

/// In-memory notification log.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl super::NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut notifications = self
            .notifications
            .write()
            .map_err(|_| lock_err("notifications"))?;
        notifications.push(notification.clone());
        Ok(())
    }
}

/// In-memory last-known values, keyed by (device id, stream code).
#[derive(Debug, Default)]
pub struct MemoryLastValueStore {
    values: RwLock<HashMap<(DeviceId, String), StreamReading>>,
}

impl MemoryLastValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: DeviceId, code: &str) -> Option<StreamReading> {
        self.values
            .read()
            .ok()?
            .get(&(device_id, code.to_string()))
            .cloned()
    }
}

#[async_trait]
impl super::LastValueStore for MemoryLastValueStore {
    async fn update(&self, device_id: DeviceId, reading: &StreamReading) -> Result<(), StoreError> {
        let mut values = self.values.write().map_err(|_| lock_err("last values"))?;
        values.insert((device_id, reading.code.clone()), reading.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeSeriesStore;

    fn sample(device: &str, stream: &str, secs: i64, value: f64) -> Sample {
        Sample {
            device_id: None,
            device: device.to_string(),
            stream: stream.to_string(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            value,
        }
    }

    #[tokio::test]
    async fn test_query_range_is_half_open() {
        let store = MemoryTimeSeriesStore::new();
        store.insert_sample(&sample("dev", "temp", 100, 1.0)).await.unwrap();
        store.insert_sample(&sample("dev", "temp", 159, 2.0)).await.unwrap();
        store.insert_sample(&sample("dev", "temp", 160, 3.0)).await.unwrap();

        let from = DateTime::from_timestamp(100, 0).unwrap();
        let to = DateTime::from_timestamp(160, 0).unwrap();
        let found = store.query_range("dev", "temp", from, to).await.unwrap();

        let values: Vec<f64> = found.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_query_range_filters_device_and_stream() {
        let store = MemoryTimeSeriesStore::new();
        store.insert_sample(&sample("dev1", "temp", 100, 1.0)).await.unwrap();
        store.insert_sample(&sample("dev2", "temp", 100, 2.0)).await.unwrap();
        store.insert_sample(&sample("dev1", "humidity", 100, 3.0)).await.unwrap();

        let from = DateTime::from_timestamp(0, 0).unwrap();
        let to = DateTime::from_timestamp(200, 0).unwrap();
        let found = store.query_range("dev1", "temp", from, to).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 1.0);
    }

    #[tokio::test]
    async fn test_aggregate_upsert_keeps_one_row() {
        let store = MemoryTimeSeriesStore::new();
        let window_start = DateTime::from_timestamp(600, 0).unwrap();

        let first = Aggregate {
            device: "dev".to_string(),
            stream: "temp".to_string(),
            window_start,
            average: 1.0,
            max: 1.0,
            min: 1.0,
            count: 1,
        };
        let second = Aggregate {
            average: 2.0,
            max: 3.0,
            min: 1.0,
            count: 2,
            ..first.clone()
        };

        store.insert_aggregate("minute", &first).await.unwrap();
        store.insert_aggregate("minute", &second).await.unwrap();

        assert_eq!(store.aggregate_count(), 1);
        let row = store.aggregate("minute", "dev", "temp", window_start).unwrap();
        assert_eq!(row.count, 2);
        assert_eq!(row.average, 2.0);
    }

    #[tokio::test]
    async fn test_aggregates_are_separate_per_kind() {
        let store = MemoryTimeSeriesStore::new();
        let window_start = DateTime::from_timestamp(0, 0).unwrap();
        let row = Aggregate {
            device: "dev".to_string(),
            stream: "temp".to_string(),
            window_start,
            average: 1.0,
            max: 1.0,
            min: 1.0,
            count: 1,
        };
        store.insert_aggregate("minute", &row).await.unwrap();
        store.insert_aggregate("hour", &row).await.unwrap();
        assert_eq!(store.aggregate_count(), 2);
    }

    #[tokio::test]
    async fn test_device_directory_seed_file() {
        use crate::DeviceDirectory;
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "guid": "dev-1"}}, {{"id": 2, "guid": "dev-2", "name": "gateway"}}]"#
        )
        .unwrap();

        let directory = MemoryDeviceDirectory::load(file.path()).unwrap();
        assert_eq!(directory.get_by_guid("dev-1").await.unwrap().id, 1);
        assert_eq!(
            directory.get_by_id(2).await.unwrap().name.as_deref(),
            Some("gateway")
        );
    }

    #[tokio::test]
    async fn test_device_directory_lookup() {
        let directory = MemoryDeviceDirectory::new();
        directory.insert(Device {
            id: 1,
            guid: "dev-1".to_string(),
            name: Some("boiler".to_string()),
        });

        use crate::DeviceDirectory;
        let by_guid = directory.get_by_guid("dev-1").await.unwrap();
        assert_eq!(by_guid.id, 1);
        let by_id = directory.get_by_id(1).await.unwrap();
        assert_eq!(by_id.guid, "dev-1");

        let missing = directory.get_by_guid("nope").await;
        assert!(matches!(missing, Err(StoreError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_last_value_overwrites() {
        use crate::LastValueStore;
        let store = MemoryLastValueStore::new();
        let mut reading = StreamReading {
            device_id: Some(1),
            device_guid: None,
            code: "temp".to_string(),
            timestamp: Some(DateTime::from_timestamp(100, 0).unwrap()),
            value: serde_json::json!(1.0),
        };
        store.update(1, &reading).await.unwrap();
        reading.value = serde_json::json!(2.0);
        store.update(1, &reading).await.unwrap();

        let current = store.get(1, "temp").unwrap();
        assert_eq!(current.value, serde_json::json!(2.0));
    }
}
