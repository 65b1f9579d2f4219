//! Service loop: one worker per transform, consuming from the queue named
//! after it and republishing every result.
//!
//! ```text
//! Connecting -> Bound -> Consuming <-> Dispatching
//!      \          \          \
//!       +----------+----------+--> Stopped
//! ```
//!
//! Only broker failures stop the loop. With [`AckMode::BeforeDispatch`] a
//! delivery is acknowledged as soon as it arrives, so a crash while
//! dispatching loses that message (at-most-once).

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Deserialize;

use crate::broker::{
    Broker, BrokerError, Connector, Delivery, DeliveryStream, ExchangeKind, QueueBinding,
    SNAPSHOT_EXCHANGE,
};
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::publisher::Publisher;
use crate::transform_registry::TransformName;

/// Lifecycle of a service loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Connecting,
    Bound,
    Consuming,
    Dispatching,
    Stopped,
}

/// When a delivery is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Acknowledge on receipt, before the transform runs.
    #[default]
    BeforeDispatch,
    /// Acknowledge once the result is published, or the snapshot rejected.
    /// A failed publish leaves the delivery unacknowledged for redelivery.
    AfterPublish,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::BeforeDispatch => "before-dispatch",
            AckMode::AfterPublish => "after-publish",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "before-dispatch" => Ok(AckMode::BeforeDispatch),
            "after-publish" => Ok(AckMode::AfterPublish),
            other => Err(format!(
                "unknown ack mode '{}' (expected before-dispatch or after-publish)",
                other
            )),
        }
    }
}

/// Consumes snapshots for one transform and republishes its results.
pub struct ServiceLoop {
    name: TransformName,
    dispatcher: Dispatcher,
    publisher: Publisher,
    ack_mode: AckMode,
    state: ServiceState,
}

impl ServiceLoop {
    pub fn new(name: TransformName, dispatcher: Dispatcher) -> Self {
        Self {
            name,
            dispatcher,
            publisher: Publisher::new(),
            ack_mode: AckMode::default(),
            state: ServiceState::Idle,
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn name(&self) -> TransformName {
        self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Connect to `address`, bind, and consume until the broker fails.
    ///
    /// Returns the error that stopped the loop.
    pub async fn run<C: Connector>(&mut self, connector: &C, address: &str) -> BrokerError {
        self.transition(ServiceState::Connecting);
        match connector.connect(address).await {
            Ok(broker) => self.serve(&broker).await,
            Err(e) => self.stop(e),
        }
    }

    /// Bind and consume on an already open connection.
    pub async fn serve<B: Broker + ?Sized>(&mut self, broker: &B) -> BrokerError {
        match self.bind(broker).await {
            Ok(deliveries) => self.consume(broker, deliveries).await,
            Err(e) => self.stop(e),
        }
    }

    /// Declare the snapshot exchange and bind this transform's queue to it.
    pub async fn bind<B: Broker + ?Sized>(
        &mut self,
        broker: &B,
    ) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        broker
            .declare_exchange(SNAPSHOT_EXCHANGE, ExchangeKind::Direct)
            .await?;
        let deliveries = broker
            .bind_queue(&QueueBinding::snapshots(self.name.as_str()))
            .await?;
        self.transition(ServiceState::Bound);
        Ok(deliveries)
    }

    /// Process deliveries one at a time until the stream fails or ends.
    pub async fn consume<B: Broker + ?Sized>(
        &mut self,
        broker: &B,
        mut deliveries: Box<dyn DeliveryStream>,
    ) -> BrokerError {
        tracing::info!(transform = %self.name, ack_mode = %self.ack_mode, "starting to consume");

        loop {
            self.transition(ServiceState::Consuming);
            let delivery = match deliveries.next_delivery().await {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return self.stop(e),
                None => {
                    return self.stop(BrokerError::Closed {
                        queue: self.name.as_str().to_string(),
                    })
                }
            };

            if let Err(e) = self.handle(broker, delivery).await {
                return self.stop(e);
            }
        }
    }

    async fn handle<B: Broker + ?Sized>(
        &mut self,
        broker: &B,
        delivery: Delivery,
    ) -> Result<(), BrokerError> {
        let (body, acker) = delivery.into_parts();
        let pending_ack = match self.ack_mode {
            AckMode::BeforeDispatch => {
                acker.ack().await?;
                None
            }
            AckMode::AfterPublish => Some(acker),
        };

        self.transition(ServiceState::Dispatching);
        let settled = match self.dispatch(body).await {
            Some(dispatched) => self
                .publisher
                .publish(broker, self.name, dispatched.key.as_ref(), dispatched.body)
                .await
                .is_ok(),
            None => true,
        };

        if let Some(acker) = pending_ack {
            if settled {
                acker.ack().await?;
            }
        }
        Ok(())
    }

    /// Run the dispatcher on the blocking pool; transforms do file I/O.
    async fn dispatch(&self, body: Bytes) -> Option<Dispatched> {
        let dispatcher = self.dispatcher.clone();
        let name = self.name;
        let task = tokio::task::spawn_blocking(move || dispatcher.dispatch_keyed(name.as_str(), &body));

        match task.await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                tracing::error!(transform = %name, error = %e, "transform task failed");
                None
            }
        }
    }

    fn transition(&mut self, next: ServiceState) {
        if self.state == next {
            return;
        }
        match next {
            ServiceState::Consuming | ServiceState::Dispatching => {
                tracing::trace!(transform = %self.name, from = ?self.state, to = ?next, "service state")
            }
            _ => tracing::info!(transform = %self.name, from = ?self.state, to = ?next, "service state"),
        }
        self.state = next;
    }

    fn stop(&mut self, error: BrokerError) -> BrokerError {
        self.transition(ServiceState::Stopped);
        tracing::error!(transform = %self.name, error = %error, "service loop stopped");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::transform_registry::TransformRegistry;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn feelings_loop() -> ServiceLoop {
        let mut registry = TransformRegistry::new();
        registry
            .register(TransformName::Feelings, Box::new(crate::transforms::feelings))
            .unwrap();
        ServiceLoop::new(TransformName::Feelings, Dispatcher::new(Arc::new(registry)))
    }

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        type Broker = MemoryBroker;

        async fn connect(&self, address: &str) -> Result<MemoryBroker, BrokerError> {
            Err(BrokerError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    #[test]
    fn test_ack_mode_parsing() {
        assert_eq!("before-dispatch".parse::<AckMode>(), Ok(AckMode::BeforeDispatch));
        assert_eq!("after-publish".parse::<AckMode>(), Ok(AckMode::AfterPublish));
        assert!("eventually".parse::<AckMode>().is_err());
        assert_eq!(AckMode::default(), AckMode::BeforeDispatch);
    }

    #[tokio::test]
    async fn test_connect_failure_stops_loop() {
        let mut service = feelings_loop();

        let error = service.run(&Unreachable, "nats://nowhere:4222").await;

        assert!(matches!(error, BrokerError::Connect { .. }));
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_declares_direct_snapshot_exchange() {
        let broker = MemoryBroker::new();
        let mut service = feelings_loop();

        let _deliveries = service.bind(&broker).await.unwrap();

        assert_eq!(service.state(), ServiceState::Bound);
        assert_eq!(broker.exchange_kind("snapshot"), Some(ExchangeKind::Direct));
        assert!(broker.has_queue("feelings"));
    }

    #[tokio::test]
    async fn test_rejected_message_is_acked_and_not_published() {
        let broker = MemoryBroker::new();
        let mut service = feelings_loop();
        let deliveries = service.bind(&broker).await.unwrap();

        broker
            .publish("snapshot", "snapshot", Bytes::from_static(br#"{"user_id":"u1"}"#))
            .await
            .unwrap();
        broker
            .publish("snapshot", "snapshot", Bytes::from_static(b"not json"))
            .await
            .unwrap();
        broker.close();

        let error = service.consume(&broker, deliveries).await;

        assert_eq!(error, BrokerError::Closed { queue: "feelings".to_string() });
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(broker.acked(), 2);
        assert!(broker.published_to("processed_data").is_empty());
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_delivery_unacked() {
        let broker = MemoryBroker::new();
        // A direct exchange under the results name makes the topic declare fail.
        broker
            .declare_exchange("processed_data", ExchangeKind::Direct)
            .await
            .unwrap();
        let mut service = feelings_loop().with_ack_mode(AckMode::AfterPublish);
        let deliveries = service.bind(&broker).await.unwrap();

        let snapshot = br#"{"user_id":"u1","datetime":"d1","happiness":0.5,"thirst":0.1,"hunger":0.2,"exhaustion":0.3}"#;
        broker
            .publish("snapshot", "snapshot", Bytes::from_static(snapshot))
            .await
            .unwrap();
        broker
            .publish("snapshot", "snapshot", Bytes::from_static(snapshot))
            .await
            .unwrap();
        broker.close();

        let error = service.consume(&broker, deliveries).await;

        assert_eq!(error, BrokerError::Closed { queue: "feelings".to_string() });
        assert_eq!(broker.acked(), 0);
        assert!(broker.published_to("processed_data").is_empty());
    }
}
