//! Commands and events carried by the dispatch buses
//!
//! Event newtypes are `#[serde(transparent)]` so the broker payload is the
//! inner record itself; the envelope's name field carries the message
//! identity. Renaming a `NAME` is a wire-protocol break with every deployed
//! producer and consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Message;
use crate::types::notification::Notification;
use crate::types::sample::Sample;
use crate::types::stream::StreamReading;

/// Command: record one notification reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNotification {
    pub id: u64,
    pub device_guid: String,
    pub notification: String,
    pub timestamp: DateTime<Utc>,
    pub parameters: Value,
}

impl Message for CreateNotification {
    const NAME: &'static str = "beacon.CreateNotification";
}

/// Event: a notification has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationCreated(pub Notification);

impl Message for NotificationCreated {
    const NAME: &'static str = "beacon.NotificationCreated";
}

/// Event: a device stream has a new last-known value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamUpdated(pub StreamReading);

impl Message for StreamUpdated {
    const NAME: &'static str = "beacon.StreamUpdated";
}

/// Event: a numeric sample has been written to the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleSaved(pub Sample);

impl Message for SampleSaved {
    const NAME: &'static str = "beacon.SampleSaved";
}

/// Event: a string value has been written to the string-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSaved(pub StreamReading);

impl Message for StringSaved {
    const NAME: &'static str = "beacon.StringSaved";
}
