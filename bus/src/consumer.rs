//! Broker consumption: a worker pool feeding the event dispatcher
//!
//! One subscription per process, shared by a configurable number of
//! delivery workers. Handlers reachable from here run concurrently with
//! each other and with the in-process buses, so they must be reentrant.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

use beacon_shared::error::FatalError;

use crate::broker::MessageBroker;
use crate::dispatch::EventDispatcher;

/// Where and how to consume.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,

    /// Subscription identity; defaults to `<process-name>-<hostname>`
    pub channel: Option<String>,

    /// Concurrent delivery workers
    pub workers: usize,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            channel: None,
            workers: 4,
        }
    }
}

/// Default subscription identity, `<process-name>-<hostname>`.
pub fn listen_identity() -> String {
    let process = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "beacon".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{process}-{host}")
}

/// Pulls messages off a broker subscription and hands them to the
/// dispatcher's inbound entry point.
pub struct BrokerConsumer<C> {
    broker: Arc<dyn MessageBroker>,
    dispatcher: Arc<EventDispatcher<C>>,
    config: ConsumerConfig,
}

impl<C: Send + Sync + 'static> BrokerConsumer<C> {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        dispatcher: Arc<EventDispatcher<C>>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            dispatcher,
            config,
        }
    }

    /// Subscribe and deliver until the subscription closes. Returns early
    /// with the error if any worker hits a fatal invariant violation; the
    /// remaining workers are aborted as the pool is dropped.
    pub async fn run(self, ctx: Arc<C>) -> Result<()> {
        let channel = self
            .config
            .channel
            .clone()
            .unwrap_or_else(listen_identity);

        for (event, handlers) in self.dispatcher.registrations() {
            info!(event, handlers, "event registration");
        }
        info!(
            topic = %self.config.topic,
            channel = %channel,
            workers = self.config.workers,
            "consuming events"
        );

        let subscription = self
            .broker
            .subscribe(&self.config.topic, &channel)
            .await
            .context("broker subscribe")?;
        let subscription = Arc::new(Mutex::new(subscription));

        let mut workers: JoinSet<Result<(), FatalError>> = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            let subscription = subscription.clone();
            let dispatcher = self.dispatcher.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                loop {
                    let message = { subscription.lock().await.recv().await };
                    let Some(raw) = message else {
                        debug!(worker, "subscription closed");
                        return Ok(());
                    };
                    dispatcher.deliver(&ctx, &raw).await?;
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            joined.context("consumer worker panicked")??;
        }
        Ok(())
    }
}
