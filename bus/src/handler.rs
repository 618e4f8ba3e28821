//! Type-erased handler plumbing shared by both buses
//!
//! Handlers are registered against a concrete message type and stored
//! erased; dispatch downcasts back to the concrete type. The erased payload
//! is an `Arc` so one decoded message can be handed to every handler in the
//! fan-out without re-decoding.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use beacon_shared::protocol::Message;

pub(crate) type ErasedMessage = Arc<dyn Any + Send + Sync>;
pub(crate) type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub(crate) type ErasedHandler<C> =
    Box<dyn Fn(Arc<C>, ErasedMessage) -> HandlerFuture + Send + Sync>;
pub(crate) type DecodeFn = fn(&serde_json::Value) -> Result<ErasedMessage, serde_json::Error>;

/// Decoder installed by the first registration for a message name. All
/// handlers sharing a name share the payload shape.
pub(crate) fn decode_erased<M: Message>(
    payload: &serde_json::Value,
) -> Result<ErasedMessage, serde_json::Error> {
    let message: M = serde_json::from_value(payload.clone())?;
    Ok(Arc::new(message))
}

/// Erase a typed handler. The downcast can only fail if two distinct types
/// were registered under one name, which the `Message` contract forbids;
/// it is reported as an ordinary handler error rather than a panic.
pub(crate) fn erase_handler<C, M, H, Fut>(handler: H) -> ErasedHandler<C>
where
    C: Send + Sync + 'static,
    M: Message,
    H: Fn(Arc<C>, Arc<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |ctx, message| match message.downcast::<M>() {
        Ok(message) => Box::pin(handler(ctx, message)),
        Err(_) => Box::pin(async {
            anyhow::bail!("payload shape mismatch for message name {}", M::NAME)
        }),
    })
}
