//! Broker wire envelope
//!
//! Messages cross the broker as JSON `{"e": "<name>", "msg": <payload>}`.
//! The name lets a consumer pick the handler set and payload shape before
//! touching the payload itself; unknown names are skipped without decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Message;

/// Wire representation of a command or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message name (`Message::NAME`)
    #[serde(rename = "e")]
    pub event: String,

    /// Serialized payload, decoded by the handler entry registered for `e`
    #[serde(rename = "msg")]
    pub payload: Value,
}

impl Envelope {
    /// Wrap a message for broker transport.
    pub fn new<M: Message>(message: &M) -> serde_json::Result<Self> {
        Ok(Self {
            event: M::NAME.to_string(),
            payload: serde_json::to_value(message)?,
        })
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}
