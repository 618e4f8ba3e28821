//! Error taxonomy shared across services
//!
//! Three classes with distinct recovery rules: validation problems are
//! logged and the message or job is dropped; transient store failures may be
//! retried by the caller on its next cycle; fatal invariant violations abort
//! the affected worker so operators are alerted.

use thiserror::Error;

/// Recoverable input problems. Logged, the offending message or job is
/// dropped, no redelivery is requested.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("missing stream code")]
    MissingStreamCode,

    #[error("timestamp before unix epoch")]
    PreEpochTimestamp,

    #[error("unknown window kind: {0}")]
    UnknownWindowKind(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("malformed job key: {0}")]
    MalformedJobKey(String),
}

/// Storage collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Timeouts and connectivity problems; safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Scheduling failures.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Must-never-happen states. The supervising component converts these into
/// a controlled shutdown instead of continuing with a violated invariant.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The notification was accepted but could not be persisted.
    #[error("failed to persist notification {id} for device {device_id}: {source}")]
    NotificationWrite {
        id: u64,
        device_id: u64,
        #[source]
        source: StoreError,
    },

    /// The rollup job was already claimed from the queue, so a failed write
    /// cannot be retried without losing the window.
    #[error("failed to persist {kind} aggregate for job {key}: {source}")]
    AggregateWrite {
        key: String,
        kind: String,
        #[source]
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(!StoreError::Backend("boom".into()).is_transient());
        assert!(!StoreError::DeviceNotFound("dev".into()).is_transient());
    }

    #[test]
    fn test_fatal_error_carries_source() {
        let fatal = FatalError::AggregateWrite {
            key: "0/minute/dev/temp".into(),
            kind: "minute".into(),
            source: StoreError::Backend("insert failed".into()),
        };
        let message = fatal.to_string();
        assert!(message.contains("minute"));
        assert!(message.contains("0/minute/dev/temp"));
    }
}
