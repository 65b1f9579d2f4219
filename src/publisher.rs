//! Publishes transform results on the processed-data topic exchange.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::broker::{Broker, BrokerError, ExchangeKind, PROCESSED_EXCHANGE};
use crate::record::CorrelationKey;
use crate::transform_registry::TransformName;

/// Publishes results with the transform name as routing key.
///
/// The topic exchange is declared before the first publish. Publishing does
/// not wait for a broker acknowledgment and failures are not retried.
pub struct Publisher {
    exchange: String,
    declared: AtomicBool,
}

impl Publisher {
    pub fn new() -> Self {
        Self::with_exchange(PROCESSED_EXCHANGE)
    }

    pub fn with_exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            declared: AtomicBool::new(false),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish `body` as the result of transform `name`.
    ///
    /// Failures are logged here and returned so the caller can decide whether
    /// to acknowledge the triggering delivery.
    pub async fn publish<B: Broker + ?Sized>(
        &self,
        broker: &B,
        name: TransformName,
        key: Option<&CorrelationKey>,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let result = self.try_publish(broker, name, key, Bytes::from(body)).await;
        if let Err(e) = &result {
            tracing::error!(transform = %name, error = %e, "failed to publish result");
        }
        result
    }

    async fn try_publish<B: Broker + ?Sized>(
        &self,
        broker: &B,
        name: TransformName,
        key: Option<&CorrelationKey>,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        if !self.declared.load(Ordering::Acquire) {
            broker
                .declare_exchange(&self.exchange, ExchangeKind::Topic)
                .await?;
            self.declared.store(true, Ordering::Release);
        }

        match key {
            Some(key) => tracing::debug!(
                transform = %name,
                user_id = %key.user_id_text(),
                datetime = %key.datetime_text(),
                "publishing result to '{}'",
                self.exchange
            ),
            None => tracing::debug!(transform = %name, "publishing result to '{}'", self.exchange),
        }

        broker.publish(&self.exchange, name.as_str(), body).await
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}
