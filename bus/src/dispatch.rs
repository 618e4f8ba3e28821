//! Typed event dispatch
//!
//! Events are identified by `Message::NAME`. Publishing runs every
//! registered handler synchronously, in registration order, on the calling
//! task; handler failures are logged with the event payload and never reach
//! the publisher. The dispatcher doubles as the inbound entry point for
//! broker deliveries, re-using the same fan-out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use beacon_shared::error::{FatalError, ValidationError};
use beacon_shared::protocol::{Envelope, Message};
use tracing::{debug, error};

use crate::broker::MessageBroker;
use crate::handler::{decode_erased, erase_handler, DecodeFn, ErasedHandler, ErasedMessage};

struct TypeEntry<C> {
    decode: DecodeFn,
    handlers: Vec<ErasedHandler<C>>,
}

/// In-process typed publish/subscribe, optionally mirrored onto a broker.
///
/// `C` is the service's context object; it is passed by the publisher and
/// handed to every handler, so handlers never reach for process globals.
pub struct EventDispatcher<C> {
    entries: HashMap<&'static str, TypeEntry<C>>,
    broker: Option<Arc<dyn MessageBroker>>,
    mirror_topic: Option<String>,
}

impl<C: Send + Sync + 'static> EventDispatcher<C> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            broker: None,
            mirror_topic: None,
        }
    }

    /// Attach a broker handle for `publish_to_broker` and mirroring.
    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Mirror every published event onto this broker topic after the local
    /// fan-out, so other processes see the same stream.
    pub fn with_mirror_topic(mut self, topic: impl Into<String>) -> Self {
        self.mirror_topic = Some(topic.into());
        self
    }

    /// Register a handler for `E`. Bootstrap only: handlers for one event
    /// type run in registration order, and the registry must not change once
    /// dispatch has started.
    pub fn on<E, H, Fut>(&mut self, handler: H)
    where
        E: Message,
        H: Fn(Arc<C>, Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let entry = self.entries.entry(E::NAME).or_insert_with(|| TypeEntry {
            decode: decode_erased::<E>,
            handlers: Vec::new(),
        });
        entry.handlers.push(erase_handler::<C, E, _, _>(handler));
        debug!(event = E::NAME, "registered event handler");
    }

    /// Registered event names with their handler counts, for startup logs.
    pub fn registrations(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.entries
            .iter()
            .map(|(name, entry)| (*name, entry.handlers.len()))
    }

    /// Publish in-process: every handler registered for `E` runs
    /// synchronously, in registration order, on the calling task. Handler
    /// errors are logged and consumed; only a [`FatalError`] escapes, along
    /// with serialization and broker failures on the mirror path. Zero
    /// registered handlers is a successful no-op.
    pub async fn publish<E: Message>(&self, ctx: &Arc<C>, event: E) -> Result<()> {
        let payload = serde_json::to_value(&event)
            .with_context(|| format!("serialize {} event", E::NAME))?;
        let erased: ErasedMessage = Arc::new(event);

        if let Some(entry) = self.entries.get(E::NAME) {
            self.run_handlers(ctx, E::NAME, entry, erased, &payload)
                .await?;
        }

        if let (Some(broker), Some(topic)) = (&self.broker, &self.mirror_topic) {
            let envelope = Envelope {
                event: E::NAME.to_string(),
                payload,
            };
            broker
                .publish(topic, envelope.to_bytes()?)
                .await
                .with_context(|| format!("mirror {} to topic {topic}", E::NAME))?;
        }

        Ok(())
    }

    /// Serialize `event` into an envelope and publish it to `topic`.
    pub async fn publish_to_broker<E: Message>(&self, topic: &str, event: &E) -> Result<()> {
        let broker = self
            .broker
            .as_ref()
            .context("no broker configured on this dispatcher")?;
        let envelope = Envelope::new(event)?;
        broker
            .publish(topic, envelope.to_bytes()?)
            .await
            .with_context(|| format!("publish {} to topic {topic}", E::NAME))?;
        Ok(())
    }

    /// Inbound broker entry point. Decodes the envelope, looks up the
    /// handler entry for its name and re-uses the in-process fan-out.
    /// Malformed envelopes and payloads are dropped with a log line; an
    /// unknown event name is a silent no-op. Delivery is at-least-once, so
    /// everything reachable from here must be idempotent.
    pub async fn deliver(&self, ctx: &Arc<C>, raw: &[u8]) -> Result<(), FatalError> {
        let envelope = match Envelope::from_bytes(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    error = %ValidationError::MalformedPayload(err),
                    "dropping undecodable envelope"
                );
                return Ok(());
            }
        };

        let Some(entry) = self.entries.get(envelope.event.as_str()) else {
            debug!(event = %envelope.event, "no handlers registered, ignoring");
            return Ok(());
        };

        let message = match (entry.decode)(&envelope.payload) {
            Ok(message) => message,
            Err(err) => {
                error!(
                    event = %envelope.event,
                    error = %ValidationError::MalformedPayload(err),
                    "dropping undecodable payload"
                );
                return Ok(());
            }
        };

        self.run_handlers(ctx, &envelope.event, entry, message, &envelope.payload)
            .await
    }

    async fn run_handlers(
        &self,
        ctx: &Arc<C>,
        name: &str,
        entry: &TypeEntry<C>,
        message: ErasedMessage,
        payload: &serde_json::Value,
    ) -> Result<(), FatalError> {
        for handler in &entry.handlers {
            if let Err(err) = handler(ctx.clone(), message.clone()).await {
                match err.downcast::<FatalError>() {
                    Ok(fatal) => {
                        error!(event = %payload, name, "fatal error handling event");
                        return Err(fatal);
                    }
                    Err(err) => {
                        error!(event = %payload, name, error = %format!("{err:#}"), "error handling event");
                    }
                }
            }
        }
        Ok(())
    }
}

impl<C: Send + Sync + 'static> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        value: f64,
    }

    impl Message for Reading {
        const NAME: &'static str = "test.Reading";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Other {
        text: String,
    }

    impl Message for Other {
        const NAME: &'static str = "test.Other";
    }

    #[derive(Default)]
    struct Ctx {
        seen: Mutex<Vec<String>>,
    }

    impl Ctx {
        fn record(&self, entry: impl Into<String>) {
            self.seen.lock().unwrap().push(entry.into());
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_publish_without_handlers_is_noop() {
        let dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        let ctx = Arc::new(Ctx::default());
        dispatcher
            .publish(&ctx, Reading { value: 1.0 })
            .await
            .unwrap();
        assert!(ctx.seen().is_empty());
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|ctx: Arc<Ctx>, e: Arc<Reading>| async move {
            ctx.record(format!("first:{}", e.value));
            Ok(())
        });
        dispatcher.on(|ctx: Arc<Ctx>, e: Arc<Reading>| async move {
            ctx.record(format!("second:{}", e.value));
            Ok(())
        });

        let ctx = Arc::new(Ctx::default());
        dispatcher
            .publish(&ctx, Reading { value: 2.0 })
            .await
            .unwrap();
        assert_eq!(ctx.seen(), vec!["first:2", "second:2"]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_siblings() {
        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|_ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            anyhow::bail!("first handler failed")
        });
        dispatcher.on(|ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            ctx.record("survivor");
            Ok(())
        });

        let ctx = Arc::new(Ctx::default());
        dispatcher
            .publish(&ctx, Reading { value: 3.0 })
            .await
            .unwrap();
        assert_eq!(ctx.seen(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn test_fatal_error_propagates() {
        use beacon_shared::error::{FatalError, StoreError};

        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|_ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            Err(FatalError::NotificationWrite {
                id: 1,
                device_id: 2,
                source: StoreError::Backend("down".into()),
            }
            .into())
        });
        dispatcher.on(|ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            ctx.record("must not run");
            Ok(())
        });

        let ctx = Arc::new(Ctx::default());
        let err = dispatcher
            .publish(&ctx, Reading { value: 4.0 })
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<FatalError>().is_some());
        assert!(ctx.seen().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_roundtrips_payload() {
        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|ctx: Arc<Ctx>, e: Arc<Reading>| async move {
            ctx.record(format!("got:{}", e.value));
            Ok(())
        });

        let envelope = Envelope::new(&Reading { value: 5.5 }).unwrap();
        let ctx = Arc::new(Ctx::default());
        dispatcher
            .deliver(&ctx, &envelope.to_bytes().unwrap())
            .await
            .unwrap();
        assert_eq!(ctx.seen(), vec!["got:5.5"]);
    }

    #[tokio::test]
    async fn test_deliver_unknown_event_is_noop() {
        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            ctx.record("reading");
            Ok(())
        });

        let envelope = Envelope::new(&Other {
            text: "hello".into(),
        })
        .unwrap();
        let ctx = Arc::new(Ctx::default());
        dispatcher
            .deliver(&ctx, &envelope.to_bytes().unwrap())
            .await
            .unwrap();
        assert!(ctx.seen().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_malformed_bytes_is_dropped() {
        let mut dispatcher: EventDispatcher<Ctx> = EventDispatcher::new();
        dispatcher.on(|ctx: Arc<Ctx>, _e: Arc<Reading>| async move {
            ctx.record("reading");
            Ok(())
        });

        let ctx = Arc::new(Ctx::default());
        dispatcher.deliver(&ctx, b"not json at all").await.unwrap();
        assert!(ctx.seen().is_empty());
    }
}
