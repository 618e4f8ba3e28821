//! Device notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::device::DeviceId;

/// Notification kind for a single stream reading
pub const KIND_STREAM: &str = "stream";

/// Notification kind for a batch of stream readings
pub const KIND_STREAM_BATCH: &str = "streams";

/// A persisted device notification.
///
/// `notification` names the kind (`stream`, `streams`, `online`, ...) and
/// decides how `parameters` is interpreted by the handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub device_id: DeviceId,
    pub notification: String,
    pub timestamp: DateTime<Utc>,
    pub parameters: Value,
}
