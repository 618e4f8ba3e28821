//! In-process dispatch buses and the broker bridge
//!
//! Two buses with a shared typed-registry design: the [`EventDispatcher`]
//! fans events out to handlers synchronously and bridges to an external
//! publish/subscribe broker, and the [`CommandQueue`] feeds a bounded,
//! single-consumer work queue. Registration happens once at bootstrap; the
//! registries are read-only afterwards, so steady-state dispatch is a map
//! lookup plus typed calls with no locking.

pub mod broker;
pub mod command;
pub mod consumer;
pub mod dispatch;

mod handler;

pub use broker::{BrokerError, LocalBroker, MessageBroker, Subscription};
pub use command::CommandQueue;
pub use consumer::{listen_identity, BrokerConsumer, ConsumerConfig};
pub use dispatch::EventDispatcher;
