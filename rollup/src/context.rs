//! Service wiring
//!
//! The context object is built once at startup and passed into every
//! handler; nothing in the service reaches for process globals.

use std::sync::Arc;

use beacon_bus::EventDispatcher;
use beacon_store::TimeSeriesStore;

use crate::config::RollupConfig;
use crate::handlers;
use crate::queue::DelayQueue;
use crate::scheduler::RollupScheduler;

/// Rollup service context.
pub struct App {
    pub config: RollupConfig,
    pub scheduler: RollupScheduler,
    pub series: Arc<dyn TimeSeriesStore>,
    pub events: Arc<EventDispatcher<App>>,
}

/// Register handlers and freeze the dispatcher into the context.
pub fn bootstrap(
    config: RollupConfig,
    queue: Arc<dyn DelayQueue>,
    series: Arc<dyn TimeSeriesStore>,
) -> Arc<App> {
    let mut events = EventDispatcher::new();
    events.on(handlers::schedule_rollups);

    Arc::new(App {
        scheduler: RollupScheduler::new(config.catalog.clone(), queue),
        config,
        series,
        events: Arc::new(events),
    })
}
