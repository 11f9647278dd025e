//! Best-effort publisher on an existing topology.

use lapin::{options::BasicPublishOptions, BasicProperties, ExchangeKind};
use tracing::debug;

use super::{Broker, BusError, Result};

/// Publishes messages to one exchange with caller-supplied routing keys.
///
/// Delivery is best-effort: no publisher confirms, no internal retries.
/// Payloads are opaque immutable bytes; size and encoding are the caller's
/// responsibility.
pub struct Publisher {
    broker: Broker,
    exchange: String,
    kind: ExchangeKind,
}

impl Publisher {
    /// Connect and idempotently declare the target exchange.
    ///
    /// Either side of a topology may start first: the declaration is
    /// create-if-absent and fails only on a kind mismatch.
    pub async fn open(url: &str, exchange: &str, kind: ExchangeKind) -> Result<Self> {
        let broker = Broker::open(url).await?;
        broker.declare_exchange(exchange, kind.clone()).await?;

        Ok(Self {
            broker,
            exchange: exchange.to_string(),
            kind,
        })
    }

    /// Send a message with a routing key.
    ///
    /// Fails with `Publish` if the channel has dropped and `reopen` was not
    /// called; never blocks longer than the underlying network write.
    pub async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<()> {
        self.broker
            .channel()
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| BusError::Publish(format!("failed to publish: {}", e)))?;

        debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            bytes = payload.len(),
            "published message"
        );
        Ok(())
    }

    /// Re-establish a dropped connection/channel with the same topology.
    ///
    /// Idempotent if already open.
    pub async fn reopen(&mut self) -> Result<()> {
        if self.broker.is_open() {
            return Ok(());
        }
        self.broker.reopen().await?;
        self.broker
            .declare_exchange(&self.exchange, self.kind.clone())
            .await
    }

    /// The exchange this publisher targets.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Close the underlying connection.
    pub async fn close(self) -> Result<()> {
        self.broker.close().await
    }
}

/// Integration tests requiring a running RabbitMQ instance.
///
/// Run with: AMQP_URL=amqp://localhost:5672 cargo test publisher_integration -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    fn amqp_url() -> String {
        std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string())
    }

    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn test_publish_on_fresh_topology() {
        let publisher = Publisher::open(&amqp_url(), "chat", ExchangeKind::Topic)
            .await
            .expect("Failed to open publisher");

        publisher
            .publish(b"hello", "")
            .await
            .expect("Publish should succeed");

        publisher.close().await.expect("Failed to close");
    }

    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn test_reopen_is_idempotent_when_open() {
        let mut publisher = Publisher::open(&amqp_url(), "chat", ExchangeKind::Topic)
            .await
            .expect("Failed to open publisher");

        publisher.reopen().await.expect("Reopen should be a no-op");
        publisher.publish(b"still here", "").await.expect("Publish");
        publisher.close().await.expect("Failed to close");
    }

    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn test_kind_mismatch_is_topology_conflict() {
        let url = amqp_url();
        let exchange = format!("conflict-{}", uuid::Uuid::new_v4());

        let first = Publisher::open(&url, &exchange, ExchangeKind::Topic)
            .await
            .expect("Failed to declare topic exchange");

        let second = Publisher::open(&url, &exchange, ExchangeKind::Fanout).await;
        assert!(matches!(
            second,
            Err(crate::bus::BusError::TopologyConflict(_))
        ));

        first.close().await.expect("Failed to close");
    }
}
