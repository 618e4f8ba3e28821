//! In-process command queue
//!
//! Bounded, single-consumer, at-most-once: enqueueing blocks once the queue
//! is full (backpressure, never a silent drop), and a crash loses whatever
//! was queued but undelivered. There is no persistence and no retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use beacon_shared::error::FatalError;
use beacon_shared::protocol::Message;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::handler::{erase_handler, ErasedHandler, ErasedMessage};

/// Queue capacity used by the services unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1000;

struct Queued {
    name: &'static str,
    payload: ErasedMessage,
    /// Serialized form, kept for error logs
    json: serde_json::Value,
}

/// Single-consumer typed work queue.
pub struct CommandQueue<C> {
    handlers: HashMap<&'static str, Vec<ErasedHandler<C>>>,
    tx: mpsc::Sender<Queued>,
    rx: Mutex<Option<mpsc::Receiver<Queued>>>,
}

impl<C: Send + Sync + 'static> CommandQueue<C> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            handlers: HashMap::new(),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Register a handler for `K`. Bootstrap only: handlers for one command
    /// type run in registration order.
    pub fn register<K, H, Fut>(&mut self, handler: H)
    where
        K: Message,
        H: Fn(Arc<C>, Arc<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .entry(K::NAME)
            .or_default()
            .push(erase_handler::<C, K, _, _>(handler));
        debug!(command = K::NAME, "registered command handler");
    }

    /// Enqueue a command. Blocks the caller while the queue is full; errors
    /// only if the consumer loop is gone.
    pub async fn create<K: Message>(&self, command: K) -> Result<()> {
        let json = serde_json::to_value(&command)
            .with_context(|| format!("serialize {} command", K::NAME))?;
        self.tx
            .send(Queued {
                name: K::NAME,
                payload: Arc::new(command),
                json,
            })
            .await
            .map_err(|_| anyhow::anyhow!("command queue closed"))
    }

    /// Consume commands one at a time until the queue closes. Handler errors
    /// are logged with the command payload and do not halt the loop; a
    /// [`FatalError`] does, and is returned for the supervisor to act on.
    pub async fn run(&self, ctx: Arc<C>) -> Result<(), FatalError> {
        let receiver = match self.rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut rx) = receiver else {
            error!("command queue is already being consumed");
            return Ok(());
        };

        debug!("listening for commands");
        while let Some(command) = rx.recv().await {
            let Some(handlers) = self.handlers.get(command.name) else {
                continue;
            };
            for handler in handlers {
                if let Err(err) = handler(ctx.clone(), command.payload.clone()).await {
                    match err.downcast::<FatalError>() {
                        Ok(fatal) => {
                            error!(
                                command = %command.json,
                                name = command.name,
                                "fatal error handling command"
                            );
                            return Err(fatal);
                        }
                        Err(err) => {
                            error!(
                                command = %command.json,
                                name = command.name,
                                error = %format!("{err:#}"),
                                "error handling command"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
