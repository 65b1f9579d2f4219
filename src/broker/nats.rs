//! NATS JetStream implementation of the broker capability.
//!
//! Exchange `E` with routing key `K` becomes subject `E.K`. Declaring an
//! exchange creates (or reuses) a JetStream stream over `E.>`, and a queue is
//! a durable pull consumer named after the queue, filtered to its binding
//! subject, with explicit acknowledgements.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use super::{
    Acknowledge, Broker, BrokerError, Connector, Delivery, DeliveryStream, ExchangeKind,
    QueueBinding,
};

/// Retention settings for the streams backing exchanges.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub max_age: Duration,
    pub max_bytes: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
            max_bytes: 1024 * 1024 * 1024,              // 1GB
        }
    }
}

/// Opens [`NatsBroker`] connections.
#[derive(Debug, Clone, Default)]
pub struct NatsConnector {
    config: NatsConfig,
}

impl NatsConnector {
    pub fn new(config: NatsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Broker = NatsBroker;

    async fn connect(&self, address: &str) -> Result<NatsBroker, BrokerError> {
        let client = async_nats::connect(address)
            .await
            .map_err(|e| BrokerError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!("Connected to NATS at {}", address);

        Ok(NatsBroker {
            jetstream: jetstream::new(client),
            config: self.config.clone(),
        })
    }
}

/// A JetStream context plus stream retention settings.
#[derive(Clone)]
pub struct NatsBroker {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

/// JetStream stream backing an exchange.
pub fn stream_name(exchange: &str) -> String {
    exchange.to_uppercase()
}

/// Subject a message published to `exchange` with `routing_key` travels on.
pub fn subject(exchange: &str, routing_key: &str) -> String {
    format!("{}.{}", exchange, routing_key)
}

/// Subject filter for a binding; topic wildcards map onto NATS wildcards.
pub fn binding_filter(binding: &QueueBinding) -> String {
    let key = match binding.kind {
        ExchangeKind::Direct => binding.routing_key.clone(),
        ExchangeKind::Topic => binding.routing_key.replace('#', ">"),
    };
    subject(&binding.exchange, &key)
}

#[async_trait]
impl Broker for NatsBroker {
    async fn declare_exchange(&self, exchange: &str, _kind: ExchangeKind) -> Result<(), BrokerError> {
        let name = stream_name(exchange);
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: name.clone(),
                subjects: vec![format!("{}.>", exchange)],
                max_age: self.config.max_age,
                max_bytes: self.config.max_bytes,
                storage: stream::StorageType::File,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Declare {
                exchange: exchange.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!("JetStream stream '{}' ready for exchange '{}'", name, exchange);
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        let bind_error = |reason: String| BrokerError::Bind {
            queue: binding.queue.clone(),
            exchange: binding.exchange.clone(),
            reason,
        };

        let stream = self
            .jetstream
            .get_stream(stream_name(&binding.exchange))
            .await
            .map_err(|e| bind_error(e.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                &binding.queue,
                pull::Config {
                    durable_name: Some(binding.queue.clone()),
                    ack_policy: AckPolicy::Explicit,
                    filter_subject: binding_filter(binding),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| bind_error(e.to_string()))?;

        let messages = consumer.messages().await.map_err(|e| BrokerError::Consume {
            queue: binding.queue.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            "Consumer '{}' bound to '{}'",
            binding.queue,
            binding_filter(binding)
        );

        Ok(Box::new(NatsStream {
            queue: binding.queue.clone(),
            messages,
        }))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<(), BrokerError> {
        // The returned ack future is dropped: results are fire-and-forget.
        let _ack = self
            .jetstream
            .publish(subject(exchange, routing_key), body)
            .await
            .map_err(|e| BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

struct NatsStream {
    queue: String,
    messages: pull::Stream,
}

#[async_trait]
impl DeliveryStream for NatsStream {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let next = self.messages.next().await?;
        Some(
            next.map(|message| {
                let body = message.message.payload.clone();
                Delivery::new(body, Box::new(NatsAck(message)))
            })
            .map_err(|e| BrokerError::Consume {
                queue: self.queue.clone(),
                reason: e.to_string(),
            }),
        )
    }
}

struct NatsAck(jetstream::Message);

#[async_trait]
impl Acknowledge for NatsAck {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.0.ack().await.map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
