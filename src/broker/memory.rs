//! In-process broker with exchange/queue routing.
//!
//! Used by the integration tests and for running a worker without a broker.
//! Every successful publish is also kept in a log that can be inspected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{
    topic_matches, Acknowledge, Broker, BrokerError, Connector, Delivery, DeliveryStream,
    ExchangeKind, QueueBinding,
};

/// A message accepted by [`MemoryBroker::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<QueueBinding>,
    queues: HashMap<String, mpsc::UnboundedSender<Bytes>>,
    published: Vec<PublishedMessage>,
    acked: usize,
}

/// Cloneable handle to a shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every message published so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Messages published to `exchange`.
    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.state()
            .published
            .iter()
            .filter(|message| message.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Number of deliveries acknowledged by consumers.
    pub fn acked(&self) -> usize {
        self.state().acked
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.state().queues.contains_key(queue)
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.state().exchanges.get(exchange).copied()
    }

    /// Drop every queue. Consumers drain what was already routed, then
    /// their streams end.
    pub fn close(&self) {
        let mut state = self.state();
        state.queues.clear();
        state.bindings.clear();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(&self, exchange: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        let mut state = self.state();
        match state.exchanges.get(exchange) {
            Some(existing) if *existing != kind => Err(BrokerError::Declare {
                exchange: exchange.to_string(),
                reason: format!("already declared as {:?}", existing),
            }),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        let mut state = self.state();
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(BrokerError::Bind {
                queue: binding.queue.clone(),
                exchange: binding.exchange.clone(),
                reason: "exchange not declared".to_string(),
            });
        }
        if state.queues.contains_key(&binding.queue) {
            return Err(BrokerError::Bind {
                queue: binding.queue.clone(),
                exchange: binding.exchange.clone(),
                reason: "queue is exclusive to another consumer".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.queues.insert(binding.queue.clone(), sender);
        state.bindings.push(binding.clone());

        Ok(Box::new(MemoryStream {
            receiver,
            state: Arc::clone(&self.state),
        }))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes) -> Result<(), BrokerError> {
        let mut state = self.state();
        let kind = state
            .exchanges
            .get(exchange)
            .copied()
            .ok_or_else(|| BrokerError::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: "exchange not declared".to_string(),
            })?;

        for binding in state.bindings.iter().filter(|b| b.exchange == exchange) {
            let routed = match kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
            };
            if let (true, Some(queue)) = (routed, state.queues.get(&binding.queue)) {
                // A closed receiver only means that consumer went away.
                let _ = queue.send(body.clone());
            }
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
        });
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Broker = MemoryBroker;

    async fn connect(&self, _address: &str) -> Result<MemoryBroker, BrokerError> {
        Ok(self.clone())
    }
}

struct MemoryStream {
    receiver: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl DeliveryStream for MemoryStream {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let body = self.receiver.recv().await?;
        let acker = MemoryAck {
            state: Arc::clone(&self.state),
        };
        Some(Ok(Delivery::new(body, Box::new(acker))))
    }
}

struct MemoryAck {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.acked += 1;
        Ok(())
    }
}
