//! Stream readings
//!
//! A stream is one named measurement channel on a device (`temp`,
//! `humidity`, `fw_version`, ...). Readings carry a JSON value: numbers go
//! through the sample store and the aggregation pipeline, strings go to the
//! string-value store only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::device::DeviceId;

/// A single reported value on one of a device's streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_guid: Option<String>,

    /// Stream code, e.g. `temp`
    pub code: String,

    /// When the device took the reading. Defaulted from the enclosing
    /// notification when the device did not report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    pub value: Value,
}

impl StreamReading {
    /// The reading's value as a number, if it is one.
    pub fn numeric(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// The reading's value as a string, if it is one.
    pub fn text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_and_text_are_exclusive() {
        let number = StreamReading {
            device_id: None,
            device_guid: None,
            code: "temp".to_string(),
            timestamp: None,
            value: serde_json::json!(21.5),
        };
        assert_eq!(number.numeric(), Some(21.5));
        assert_eq!(number.text(), None);

        let text = StreamReading {
            value: serde_json::json!("1.2.3"),
            code: "fw_version".to_string(),
            ..number
        };
        assert_eq!(text.numeric(), None);
        assert_eq!(text.text(), Some("1.2.3"));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let reading = StreamReading {
            device_id: None,
            device_guid: None,
            code: "temp".to_string(),
            timestamp: None,
            value: serde_json::json!(1.0),
        };

        let json = serde_json::to_string(&reading).unwrap();
        assert!(!json.contains("device_id"));
        assert!(!json.contains("timestamp"));

        let deserialized: StreamReading = serde_json::from_str(&json).unwrap();
        assert_eq!(reading, deserialized);
    }
}
