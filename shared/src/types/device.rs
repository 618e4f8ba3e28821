//! Device directory records

use serde::{Deserialize, Serialize};

/// Numeric device id assigned by the directory
pub type DeviceId = u64;

/// A registered device as known to the directory.
///
/// The guid is the stable external identifier used on the wire and in
/// rollup job keys; the numeric id is internal to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub guid: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
