//! Broker capability consumed by the service loop.
//!
//! The service only needs to declare exchanges, bind a queue, pull deliveries
//! and publish. [`nats`] maps those primitives onto NATS JetStream;
//! [`memory`] keeps everything in process for tests and local runs.

use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod nats;

pub use memory::{MemoryBroker, PublishedMessage};
pub use nats::{NatsBroker, NatsConfig, NatsConnector};

/// Direct exchange carrying inbound snapshots.
pub const SNAPSHOT_EXCHANGE: &str = "snapshot";

/// Routing key every transform queue binds with on [`SNAPSHOT_EXCHANGE`].
pub const SNAPSHOT_ROUTING_KEY: &str = "snapshot";

/// Topic exchange carrying processed results, keyed by transform name.
pub const PROCESSED_EXCHANGE: &str = "processed_data";

/// Connection and channel failures. These are fatal for a service loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to declare exchange '{exchange}': {reason}")]
    Declare { exchange: String, reason: String },

    #[error("failed to bind queue '{queue}' to '{exchange}': {reason}")]
    Bind {
        queue: String,
        exchange: String,
        reason: String,
    },

    #[error("failed to consume from '{queue}': {reason}")]
    Consume { queue: String, reason: String },

    #[error("failed to acknowledge delivery: {0}")]
    Ack(String),

    #[error("failed to publish to '{exchange}' with key '{routing_key}': {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("delivery stream for '{queue}' closed")]
    Closed { queue: String },
}

/// How an exchange routes messages to bound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routing key must equal the binding key.
    Direct,
    /// Routing key is matched against a binding pattern (`*`, `#`).
    Topic,
}

/// A queue bound to an exchange under a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub kind: ExchangeKind,
    pub routing_key: String,
}

impl QueueBinding {
    /// Binding for a transform's inbound snapshot queue.
    pub fn snapshots(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: SNAPSHOT_EXCHANGE.to_string(),
            kind: ExchangeKind::Direct,
            routing_key: SNAPSHOT_ROUTING_KEY.to_string(),
        }
    }
}

/// Acknowledges one delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
}

/// One message taken from a queue.
pub struct Delivery {
    pub body: Bytes,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(body: Bytes, acker: Box<dyn Acknowledge>) -> Self {
        Self { body, acker }
    }

    pub fn into_parts(self) -> (Bytes, Box<dyn Acknowledge>) {
        (self.body, self.acker)
    }
}

/// Stream of deliveries from a bound queue.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Wait for the next delivery. `None` means the stream has ended.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}

/// An open broker connection.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare an exchange; declaring an existing exchange is a no-op.
    async fn declare_exchange(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declare `binding.queue` and bind it, returning its delivery stream.
    async fn bind_queue(&self, binding: &QueueBinding) -> Result<Box<dyn DeliveryStream>, BrokerError>;

    /// Publish `body` without waiting for a broker acknowledgment.
    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<(), BrokerError>;
}

/// Opens broker connections from an address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Broker: Broker;

    async fn connect(&self, address: &str) -> Result<Self::Broker, BrokerError>;
}

/// Match a topic routing key against a binding pattern.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches
/// zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&word, rest)) => match key.split_first() {
                Some((&first, key_rest)) => (word == "*" || word == first) && matches(rest, key_rest),
                None => false,
            },
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_exact_and_wildcards() {
        assert!(topic_matches("pose", "pose"));
        assert!(!topic_matches("pose", "feelings"));
        assert!(topic_matches("*", "depth_image"));
        assert!(topic_matches("#", "a.b.c"));
        assert!(topic_matches("a.#", "a"));
        assert!(topic_matches("a.*.c", "a.b.c"));
        assert!(!topic_matches("a.*", "a.b.c"));
    }

    #[test]
    fn test_snapshot_binding() {
        let binding = QueueBinding::snapshots("pose");

        assert_eq!(binding.queue, "pose");
        assert_eq!(binding.exchange, "snapshot");
        assert_eq!(binding.kind, ExchangeKind::Direct);
        assert_eq!(binding.routing_key, "snapshot");
    }
}
