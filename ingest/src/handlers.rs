//! Command and event handlers for the ingest pipeline
//!
//! Control flow: an inbound measurement arrives as a `CreateNotification`
//! command; persisting it produces `NotificationCreated`, which updates the
//! last-known value and re-publishes per-stream `StreamUpdated` events;
//! those split into the numeric sample path and the string-value path.
//! Handlers here are reachable from the in-process buses and from broker
//! redelivery, so all of them are idempotent.

use std::sync::Arc;

use anyhow::Result;
use beacon_shared::error::{FatalError, ValidationError};
use beacon_shared::messages::{
    CreateNotification, NotificationCreated, SampleSaved, StreamUpdated, StringSaved,
};
use beacon_shared::protocol::Message;
use beacon_shared::types::notification::{Notification, KIND_STREAM, KIND_STREAM_BATCH};
use beacon_shared::types::sample::{Sample, StringSample};
use beacon_shared::types::stream::StreamReading;
use beacon_shared::utils::id;
use chrono::Utc;
use tracing::{debug, error, warn};

use crate::context::App;
use crate::metrics;

/// Command handler: persist the notification and announce it.
///
/// A persistence failure after the command was accepted is an invariant
/// violation; it halts the command loop instead of silently losing data.
pub async fn create_notification(ctx: Arc<App>, cmd: Arc<CreateNotification>) -> Result<()> {
    let device = ctx.devices.get_by_guid(&cmd.device_guid).await?;

    let notification = Notification {
        id: cmd.id,
        device_id: device.id,
        notification: cmd.notification.clone(),
        timestamp: cmd.timestamp,
        parameters: cmd.parameters.clone(),
    };

    if let Err(err) = ctx.notifications.insert(&notification).await {
        return Err(FatalError::NotificationWrite {
            id: notification.id,
            device_id: device.id,
            source: err,
        }
        .into());
    }
    metrics::NOTIFICATIONS_TOTAL.inc();

    ctx.events
        .publish(&ctx, NotificationCreated(notification))
        .await
}

/// Track the last-known value for single-stream notifications and
/// re-publish the reading as a `StreamUpdated` event with the device
/// identity attached.
pub async fn update_last_value(ctx: Arc<App>, event: Arc<NotificationCreated>) -> Result<()> {
    let n = &event.0;
    if n.notification != KIND_STREAM {
        return Ok(());
    }

    let device = ctx.devices.get_by_id(n.device_id).await?;

    let mut reading: StreamReading = match serde_json::from_value(n.parameters.clone()) {
        Ok(reading) => reading,
        Err(err) => {
            warn!(
                notification = n.id,
                error = %ValidationError::MalformedPayload(err),
                "ignoring stream notification with undecodable parameters"
            );
            return Ok(());
        }
    };

    if reading.timestamp.is_none() {
        debug!(notification = n.id, "missing stream timestamp, using notification time");
        reading.timestamp = Some(n.timestamp);
    }
    if reading.timestamp.is_some_and(|ts| ts.timestamp() < 0) {
        warn!(
            notification = n.id,
            error = %ValidationError::PreEpochTimestamp,
            "dropping stream reading"
        );
        return Ok(());
    }

    ctx.last_values.update(device.id, &reading).await?;
    debug!(device = %device.guid, code = %reading.code, "updated last-known value");

    reading.device_id = Some(device.id);
    reading.device_guid = Some(device.guid);
    ctx.events.publish(&ctx, StreamUpdated(reading)).await
}

/// Split a batched notification into one `CreateNotification` per stream.
/// The bounded command queue provides the backpressure here: a burst of
/// batches blocks this handler rather than flooding the process.
pub async fn split_batch(ctx: Arc<App>, event: Arc<NotificationCreated>) -> Result<()> {
    let n = &event.0;
    if n.notification != KIND_STREAM_BATCH {
        return Ok(());
    }

    let device = ctx.devices.get_by_id(n.device_id).await?;

    let readings: Vec<StreamReading> = serde_json::from_value(n.parameters.clone())
        .map_err(ValidationError::MalformedPayload)?;

    for mut reading in readings {
        let timestamp = *reading.timestamp.get_or_insert_with(Utc::now);
        debug!(
            device = %device.guid,
            code = %reading.code,
            value = %reading.value,
            "splitting batched stream"
        );

        let command = CreateNotification {
            id: id::next_id(),
            device_guid: device.guid.clone(),
            notification: KIND_STREAM.to_string(),
            timestamp,
            parameters: serde_json::to_value(&reading)?,
        };
        ctx.commands.create(command).await?;
    }
    metrics::BATCHES_SPLIT_TOTAL.inc();
    Ok(())
}

/// Persist numeric readings as raw samples and announce them. Non-numeric
/// values are not samples; `save_string` owns those.
pub async fn save_sample(ctx: Arc<App>, event: Arc<StreamUpdated>) -> Result<()> {
    let reading = &event.0;
    let Some(value) = reading.numeric() else {
        debug!(code = %reading.code, "non-numeric reading, not a sample");
        return Ok(());
    };

    let Some(device) = resolve_device_guid(&ctx, reading).await? else {
        return Ok(());
    };
    let Some(timestamp) = reading.timestamp else {
        return Err(ValidationError::MissingTimestamp.into());
    };
    if reading.code.is_empty() {
        return Err(ValidationError::MissingStreamCode.into());
    }

    let sample = Sample {
        device_id: reading.device_id,
        device,
        stream: reading.code.clone(),
        timestamp,
        value,
    };
    ctx.series.insert_sample(&sample).await?;
    metrics::SAMPLES_TOTAL.inc();

    ctx.events.publish(&ctx, SampleSaved(sample)).await
}

/// Persist string readings in the string-value store. They never reach the
/// numeric sample path or the aggregation scheduler.
pub async fn save_string(ctx: Arc<App>, event: Arc<StreamUpdated>) -> Result<()> {
    let reading = &event.0;
    let Some(value) = reading.text() else {
        debug!(code = %reading.code, "non-string reading, not a string value");
        return Ok(());
    };

    let Some(device) = resolve_device_guid(&ctx, reading).await? else {
        return Ok(());
    };
    let Some(timestamp) = reading.timestamp else {
        return Err(ValidationError::MissingTimestamp.into());
    };
    if reading.code.is_empty() {
        return Err(ValidationError::MissingStreamCode.into());
    }

    ctx.series
        .insert_string(&StringSample {
            device: device.clone(),
            stream: reading.code.clone(),
            timestamp,
            value: value.to_string(),
        })
        .await?;
    metrics::STRINGS_TOTAL.inc();

    let mut saved = reading.clone();
    saved.device_guid = Some(device);
    ctx.events.publish(&ctx, StringSaved(saved)).await
}

/// Forward events to the configured export topics for external consumers.
pub async fn forward<E: Message>(ctx: Arc<App>, event: Arc<E>) -> Result<()> {
    for topic in &ctx.config.export_topics {
        ctx.events.publish_to_broker(topic, event.as_ref()).await?;
    }
    Ok(())
}

/// The device guid for a reading, looking it up by id when the guid is
/// absent. Returns `None` (after logging) when the reading carries no
/// identity at all.
async fn resolve_device_guid(ctx: &App, reading: &StreamReading) -> Result<Option<String>> {
    if let Some(guid) = &reading.device_guid {
        if !guid.is_empty() {
            return Ok(Some(guid.clone()));
        }
    }
    let Some(device_id) = reading.device_id else {
        error!(code = %reading.code, "no device id or guid on stream update, ignoring");
        return Ok(None);
    };
    warn!(device_id, "looking up device guid by id, this is the slow path");
    let device = ctx.devices.get_by_id(device_id).await?;
    Ok(Some(device.guid))
}
