//! Rollup window catalogue
//!
//! A window kind names a rollup granularity: how wide the window is and how
//! long after a sample its rollup job becomes due. The catalogue is fixed at
//! startup; samples are truncated onto window boundaries in unix time.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// One rollup granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Window length
    pub duration: Duration,

    /// How long after a scheduling call the rollup job becomes due
    pub schedule_delay: Duration,
}

/// Fixed catalogue of window kinds.
#[derive(Debug, Clone)]
pub struct WindowCatalog {
    windows: BTreeMap<String, WindowConfig>,
}

impl WindowCatalog {
    /// An empty catalogue; useful for tests that want full control.
    pub fn empty() -> Self {
        Self {
            windows: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, kind: impl Into<String>, config: WindowConfig) {
        self.windows.insert(kind.into(), config);
    }

    pub fn get(&self, kind: &str) -> Option<WindowConfig> {
        self.windows.get(kind).copied()
    }

    /// All configured kinds, in stable order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for WindowCatalog {
    /// The production catalogue: minute, hour and day rollups.
    fn default() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(
            "minute",
            WindowConfig {
                duration: Duration::from_secs(60),
                schedule_delay: Duration::from_secs(10),
            },
        );
        catalog.insert(
            "hour",
            WindowConfig {
                duration: Duration::from_secs(60 * 60),
                schedule_delay: Duration::from_secs(10 * 60),
            },
        );
        catalog.insert(
            "day",
            WindowConfig {
                duration: Duration::from_secs(24 * 60 * 60),
                schedule_delay: Duration::from_secs(6 * 60 * 60),
            },
        );
        catalog
    }
}

/// Truncate a timestamp down to the start of the window containing it.
pub fn truncate(ts: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let width = window.as_secs() as i64;
    let secs = ts.timestamp();
    let start = secs - secs.rem_euclid(width);
    DateTime::from_timestamp(start, 0).expect("window start within datetime range")
}
