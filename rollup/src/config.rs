//! Rollup service configuration

use std::time::Duration;

use beacon_shared::types::window::WindowCatalog;

/// Rollup service configuration. Defaults come from `BEACON_*` environment
/// variables with sensible fallbacks; the binary's flags override them.
#[derive(Debug, Clone)]
pub struct RollupConfig {
    /// Broker topic carrying the event stream
    pub events_topic: String,

    /// Subscription identity override (default `<process>-<hostname>`)
    pub listen_name: Option<String>,

    /// Concurrent broker delivery workers
    pub consumer_workers: usize,

    /// Rollup workers draining the delay queue
    pub workers: usize,

    /// Maximum jobs claimed per worker poll
    pub max_pop: usize,

    /// Sleep between polls when nothing is due
    pub poll_interval: Duration,

    /// Window catalogue
    pub catalog: WindowCatalog,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            events_topic: std::env::var("BEACON_EVENTS_TOPIC")
                .unwrap_or_else(|_| "beacon.events".to_string()),
            listen_name: std::env::var("BEACON_LISTEN_NAME").ok(),
            consumer_workers: env_parse("BEACON_CONSUMER_WORKERS", 4),
            workers: env_parse("BEACON_ROLLUP_WORKERS", 1),
            max_pop: env_parse("BEACON_MAX_POP", 10),
            poll_interval: Duration::from_secs(env_parse("BEACON_POLL_INTERVAL_SECS", 1)),
            catalog: WindowCatalog::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
