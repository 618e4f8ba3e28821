//! Raw samples and window aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::device::DeviceId;

/// A raw numeric measurement on one device stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Internal device id, carried between handlers but never serialized.
    #[serde(skip)]
    pub device_id: Option<DeviceId>,

    /// Device guid
    pub device: String,

    /// Stream code
    pub stream: String,

    pub timestamp: DateTime<Utc>,

    pub value: f64,
}

/// A string-valued measurement. Stored separately from numeric samples and
/// never scheduled for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringSample {
    pub device: String,
    pub stream: String,
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

/// Statistical rollup of the raw samples inside one window.
///
/// At most one aggregate exists per (device, stream, window start) and
/// window kind; writes replace any previous row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub device: String,
    pub stream: String,

    /// Start of the window the statistics cover
    pub window_start: DateTime<Utc>,

    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}
