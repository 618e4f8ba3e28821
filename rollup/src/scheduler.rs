//! Rollup scheduling
//!
//! Every persisted sample asks for a rollup of each window covering it. The
//! scheduler truncates the sample time onto the window boundary, builds the
//! job key and upserts it with a fresh due time, coalescing bursts of
//! samples for one window into a single pending job.

use std::sync::Arc;

use beacon_shared::error::{ScheduleError, ValidationError};
use beacon_shared::types::window::{truncate, WindowCatalog};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::queue::DelayQueue;

/// A delay-queue job key, `<windowStart>/<kind>/<deviceGuid>/<streamCode>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    /// Window start, seconds since Unix epoch
    pub window_start: i64,
    pub kind: String,
    pub device: String,
    pub stream: String,
}

impl JobKey {
    pub fn encode(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.window_start, self.kind, self.device, self.stream
        )
    }

    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let mut parts = raw.splitn(4, '/');
        let (Some(start), Some(kind), Some(device), Some(stream)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ValidationError::MalformedJobKey(raw.to_string()));
        };
        if kind.is_empty() || device.is_empty() || stream.is_empty() {
            return Err(ValidationError::MalformedJobKey(raw.to_string()));
        }
        let window_start = start
            .parse()
            .map_err(|_| ValidationError::MalformedJobKey(raw.to_string()))?;
        Ok(Self {
            window_start,
            kind: kind.to_string(),
            device: device.to_string(),
            stream: stream.to_string(),
        })
    }
}

/// Schedules rollup jobs onto a shared delay queue.
pub struct RollupScheduler {
    catalog: WindowCatalog,
    queue: Arc<dyn DelayQueue>,
}

impl RollupScheduler {
    pub fn new(catalog: WindowCatalog, queue: Arc<dyn DelayQueue>) -> Self {
        Self { catalog, queue }
    }

    pub fn catalog(&self) -> &WindowCatalog {
        &self.catalog
    }

    /// Ensure a rollup will run for the window of `kind` containing
    /// `sample_time` on (device, stream).
    pub fn schedule(
        &self,
        sample_time: DateTime<Utc>,
        kind: &str,
        device: &str,
        stream: &str,
    ) -> Result<(), ScheduleError> {
        self.schedule_at(Utc::now(), sample_time, kind, device, stream)
    }

    /// Clock-explicit form of [`schedule`](Self::schedule).
    ///
    /// The due time is anchored to `now`, the scheduling call's wall clock,
    /// not to the window's close: repeated samples inside one window keep
    /// pushing the job's due time forward. That debounce under load is
    /// relied upon system-wide and must not be "fixed" to window-end
    /// anchoring without revisiting every consumer.
    pub fn schedule_at(
        &self,
        now: DateTime<Utc>,
        sample_time: DateTime<Utc>,
        kind: &str,
        device: &str,
        stream: &str,
    ) -> Result<(), ScheduleError> {
        let window = self
            .catalog
            .get(kind)
            .ok_or_else(|| ValidationError::UnknownWindowKind(kind.to_string()))?;

        let window_start = truncate(sample_time, window.duration);
        let key = JobKey {
            window_start: window_start.timestamp(),
            kind: kind.to_string(),
            device: device.to_string(),
            stream: stream.to_string(),
        };
        let due = now.timestamp() + window.schedule_delay.as_secs() as i64;

        debug!(kind, key = %key.encode(), due, "scheduling rollup");
        self.queue.upsert(&key.encode(), due)?;
        Ok(())
    }
}
