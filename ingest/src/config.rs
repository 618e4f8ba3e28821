//! Ingest service configuration

use beacon_bus::command;

/// Ingest service configuration. Defaults come from `BEACON_*` environment
/// variables with sensible fallbacks.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Broker topic the service mirrors its events onto
    pub events_topic: String,

    /// Extra topics every notification/stream event is forwarded to, for
    /// external integrations
    pub export_topics: Vec<String>,

    /// Optional topic to consume events published by other processes. The
    /// service never subscribes to its own mirror topic: its handlers
    /// already ran in-process.
    pub inbound_topic: Option<String>,

    /// Subscription identity override (default `<process>-<hostname>`)
    pub listen_name: Option<String>,

    /// Concurrent broker delivery workers
    pub consumer_workers: usize,

    /// Bounded command queue capacity
    pub command_capacity: usize,

    /// Optional JSON file seeding the device directory
    pub devices_path: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            events_topic: std::env::var("BEACON_EVENTS_TOPIC")
                .unwrap_or_else(|_| "beacon.events".to_string()),
            export_topics: std::env::var("BEACON_EXPORT_TOPICS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|topic| !topic.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            inbound_topic: std::env::var("BEACON_INBOUND_TOPIC").ok(),
            listen_name: std::env::var("BEACON_LISTEN_NAME").ok(),
            consumer_workers: std::env::var("BEACON_CONSUMER_WORKERS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(4),
            command_capacity: std::env::var("BEACON_COMMAND_CAPACITY")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(command::DEFAULT_CAPACITY),
            devices_path: std::env::var("BEACON_DEVICES_PATH").ok(),
        }
    }
}
