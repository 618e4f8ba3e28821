//! Storage collaborators for Beacon
//!
//! The core consumes persistence through these narrow interfaces. In-memory
//! implementations back tests and single-node runs; the optional ClickHouse
//! backend persists the time series for real deployments.

pub mod memory;

#[cfg(feature = "clickhouse-storage")]
pub mod clickhouse;
#[cfg(feature = "clickhouse-storage")]
pub mod metrics;

use async_trait::async_trait;
use beacon_shared::error::StoreError;
use beacon_shared::types::device::{Device, DeviceId};
use beacon_shared::types::notification::Notification;
use beacon_shared::types::sample::{Aggregate, Sample, StringSample};
use beacon_shared::types::stream::StreamReading;
use chrono::{DateTime, Utc};

/// Raw sample and rollup persistence.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn insert_sample(&self, sample: &Sample) -> Result<(), StoreError>;

    /// String values live in their own table and never feed aggregation.
    async fn insert_string(&self, sample: &StringSample) -> Result<(), StoreError>;

    /// Numeric samples with `timestamp` in the half-open range `[from, to)`.
    async fn query_range(
        &self,
        device: &str,
        stream: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError>;

    /// Upsert: at most one row per (device, stream, window start) and kind.
    async fn insert_aggregate(&self, kind: &str, aggregate: &Aggregate) -> Result<(), StoreError>;
}

/// Device lookups.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn get_by_guid(&self, guid: &str) -> Result<Device, StoreError>;
    async fn get_by_id(&self, id: DeviceId) -> Result<Device, StoreError>;
}

/// Notification persistence.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError>;
}

/// Last-known value per (device, stream code).
#[async_trait]
pub trait LastValueStore: Send + Sync {
    async fn update(&self, device_id: DeviceId, reading: &StreamReading) -> Result<(), StoreError>;
}
