//! Service wiring
//!
//! The context object is built once at startup and passed into every
//! handler. Registration happens on the mutable buses first; the finished
//! registries are frozen into `Arc`s inside the context, so steady-state
//! dispatch never takes a lock.

use std::sync::Arc;

use beacon_bus::{CommandQueue, EventDispatcher, MessageBroker};
use beacon_shared::messages::{NotificationCreated, StreamUpdated};
use beacon_store::{DeviceDirectory, LastValueStore, NotificationStore, TimeSeriesStore};

use crate::config::IngestConfig;
use crate::handlers;

/// Storage handles consumed by the service.
pub struct Stores {
    pub devices: Arc<dyn DeviceDirectory>,
    pub notifications: Arc<dyn NotificationStore>,
    pub last_values: Arc<dyn LastValueStore>,
    pub series: Arc<dyn TimeSeriesStore>,
}

/// Ingest service context.
pub struct App {
    pub config: IngestConfig,
    pub devices: Arc<dyn DeviceDirectory>,
    pub notifications: Arc<dyn NotificationStore>,
    pub last_values: Arc<dyn LastValueStore>,
    pub series: Arc<dyn TimeSeriesStore>,
    pub events: Arc<EventDispatcher<App>>,
    pub commands: Arc<CommandQueue<App>>,
}

/// Register the full handler set and freeze the buses into the context.
///
/// Handler order matters: handlers for one event type run in registration
/// order on every dispatch.
pub fn bootstrap(
    config: IngestConfig,
    broker: Arc<dyn MessageBroker>,
    stores: Stores,
) -> Arc<App> {
    let mut events = EventDispatcher::new()
        .with_broker(broker)
        .with_mirror_topic(config.events_topic.clone());
    events.on(handlers::update_last_value);
    events.on(handlers::split_batch);
    events.on(handlers::save_sample);
    events.on(handlers::save_string);
    events.on(handlers::forward::<NotificationCreated>);
    events.on(handlers::forward::<StreamUpdated>);

    let mut commands = CommandQueue::new(config.command_capacity);
    commands.register(handlers::create_notification);

    Arc::new(App {
        config,
        devices: stores.devices,
        notifications: stores.notifications,
        last_values: stores.last_values,
        series: stores.series,
        events: Arc::new(events),
        commands: Arc::new(commands),
    })
}
