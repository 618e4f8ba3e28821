//! Broker collaborator interface and the in-process loopback
//!
//! Production deployments plug an external at-least-once broker in behind
//! [`MessageBroker`]; [`LocalBroker`] fans messages out inside one process
//! for single-node runs and tests. Topics carry named channels: every
//! channel of a topic receives each message once, and consumers within one
//! channel compete for messages.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Per-(topic, channel) buffer before publishers start blocking.
const CHANNEL_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker publish failed: {0}")]
    Publish(String),

    #[error("broker subscribe failed: {0}")]
    Subscribe(String),
}

/// Named-topic publish/subscribe.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Open the single subscription for `(topic, channel)`. Concurrency
    /// within the channel comes from sharing the subscription between
    /// consumer workers, not from subscribing twice.
    async fn subscribe(&self, topic: &str, channel: &str) -> Result<Subscription, BrokerError>;
}

/// Receiving side of one (topic, channel) subscription.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    /// Next message, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// In-process broker loopback.
///
/// Delivery here is at-most-once; the trait contract for external brokers
/// is at-least-once, so handlers stay idempotent either way.
#[derive(Default)]
pub struct LocalBroker {
    topics: Mutex<HashMap<String, HashMap<String, mpsc::Sender<Vec<u8>>>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBroker for LocalBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // Snapshot the senders so the lock is not held across sends.
        let channels: Vec<(String, mpsc::Sender<Vec<u8>>)> = {
            let topics = self
                .topics
                .lock()
                .map_err(|e| BrokerError::Publish(e.to_string()))?;
            match topics.get(topic) {
                Some(channels) => channels
                    .iter()
                    .map(|(name, tx)| (name.clone(), tx.clone()))
                    .collect(),
                // No subscribers yet is not an error; retention is the
                // broker's problem, not the publisher's.
                None => Vec::new(),
            }
        };

        for (channel, tx) in channels {
            if tx.send(payload.clone()).await.is_err() {
                // Subscription dropped; forget the channel.
                if let Ok(mut topics) = self.topics.lock() {
                    if let Some(channels) = topics.get_mut(topic) {
                        channels.remove(&channel);
                    }
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, channel: &str) -> Result<Subscription, BrokerError> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let mut topics = self
            .topics
            .lock()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        topics
            .entry(topic.to_string())
            .or_default()
            .insert(channel.to_string(), tx);
        Ok(Subscription { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_each_channel_gets_a_copy() {
        let broker = LocalBroker::new();
        let mut first = broker.subscribe("events", "svc-a").await.unwrap();
        let mut second = broker.subscribe("events", "svc-b").await.unwrap();

        broker.publish("events", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), b"hello");
        assert_eq!(second.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broker = LocalBroker::new();
        broker.publish("empty", b"lost".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let broker = LocalBroker::new();
        let mut events = broker.subscribe("events", "svc").await.unwrap();
        broker.publish("other", b"nope".to_vec()).await.unwrap();
        broker.publish("events", b"yes".to_vec()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), b"yes");
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let broker = LocalBroker::new();
        let sub = broker.subscribe("events", "gone").await.unwrap();
        drop(sub);

        broker.publish("events", b"one".to_vec()).await.unwrap();
        let topics = broker.topics.lock().unwrap();
        assert!(!topics.get("events").unwrap().contains_key("gone"));
    }
}
