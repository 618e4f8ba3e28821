//! Event handlers for the rollup service

use std::sync::Arc;

use anyhow::Result;
use beacon_shared::messages::SampleSaved;
use tracing::debug;

use crate::context::App;
use crate::metrics;

/// Schedule every catalogue window for a freshly persisted sample.
///
/// Broker delivery is at-least-once; re-scheduling an already queued window
/// is the same upsert the debounce relies on, so duplicates are harmless.
pub async fn schedule_rollups(ctx: Arc<App>, event: Arc<SampleSaved>) -> Result<()> {
    let sample = &event.0;
    debug!(device = %sample.device, stream = %sample.stream, "scheduling rollups for sample");
    for kind in ctx.scheduler.catalog().kinds() {
        ctx.scheduler
            .schedule(sample.timestamp, kind, &sample.device, &sample.stream)?;
        metrics::JOBS_SCHEDULED.inc();
    }
    Ok(())
}
