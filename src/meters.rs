//! Meter ingestion: the durable worker handler that persists readings and
//! republishes update notices for live viewers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bus::{self, BusError, JobHandler, Publisher};
use crate::payload::{self, MeterReading, UpdateNotice};
use crate::routing;
use crate::store::MeterStore;

/// Persists each reading, then notifies listeners on the updates exchange.
pub struct MeterDbHandler {
    store: Arc<dyn MeterStore>,
    notifier: Publisher,
}

impl MeterDbHandler {
    pub fn new(store: Arc<dyn MeterStore>, notifier: Publisher) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl JobHandler for MeterDbHandler {
    type Job = MeterReading;

    async fn handle(&self, routing_key: &str, reading: MeterReading) -> bus::Result<()> {
        info!(
            routing_key,
            meter_id = %reading.id,
            value = reading.value,
            "storing meter reading"
        );

        // A storage failure is recoverable: the error bubbles up and the
        // worker requeues the delivery.
        self.store
            .insert_reading(&reading)
            .await
            .map_err(|e| BusError::Handler(e.to_string()))?;

        // Best-effort notice, not transactional with the ack.
        let notice = payload::encode(&UpdateNotice {
            id: reading.id.clone(),
        })?;
        if let Err(e) = self
            .notifier
            .publish(&notice, &routing::meter_key(&reading.id))
            .await
        {
            warn!(meter_id = %reading.id, error = %e, "failed to publish update notice");
        }

        Ok(())
    }
}

/// Integration tests requiring a running RabbitMQ instance.
///
/// Run with: AMQP_URL=amqp://localhost:5672 cargo test meters_integration -- --ignored
#[cfg(test)]
mod integration_tests {
    use std::time::Duration;

    use lapin::ExchangeKind;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::watch;

    use super::*;
    use crate::bus::{DurableWorker, SubscribeConfig, Subscriber, WorkerConfig};
    use crate::payload::MeterState;
    use crate::store::SqliteMeterStore;

    fn amqp_url() -> String {
        std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string())
    }

    fn unique(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4())
    }

    /// The full request/notify cycle: reading published, worker persists it,
    /// worker republishes a notice, viewer subscription sees exactly one.
    #[tokio::test]
    #[ignore = "Requires RabbitMQ"]
    async fn test_reading_is_stored_and_notice_republished() {
        let url = amqp_url();
        let meters_exchange = unique("meters");
        let updates_exchange = unique("meters-updates");
        let queue = unique("meters-db-q");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory sqlite");
        let store = SqliteMeterStore::new(pool);
        store.init().await.expect("Failed to init schema");
        let store: Arc<dyn MeterStore> = Arc::new(store);

        let (viewer, mut handoff) = Subscriber::spawn(SubscribeConfig::topic(
            &url,
            &updates_exchange,
            "meter.*",
        ))
        .await
        .expect("Failed to spawn viewer subscription");

        let notifier = Publisher::open(&url, &updates_exchange, ExchangeKind::Topic)
            .await
            .expect("Failed to open notifier");
        let handler = MeterDbHandler::new(store.clone(), notifier);

        let worker = DurableWorker::connect(WorkerConfig {
            url: url.clone(),
            exchange: meters_exchange.clone(),
            queue,
            binding: "meter.#".to_string(),
            control_exchange: None,
        })
        .await
        .expect("Failed to connect worker");

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker_task = tokio::spawn(async move { worker.run(&handler, stop_rx).await });

        let emitter = Publisher::open(&url, &meters_exchange, ExchangeKind::Topic)
            .await
            .expect("Failed to open emitter");
        emitter
            .publish(
                br#"{"id":"m1","ts":1000.0,"value":42,"state":1}"#,
                "meter.m1",
            )
            .await
            .expect("Publish");

        let notice = tokio::time::timeout(Duration::from_secs(5), handoff.recv())
            .await
            .expect("Timed out waiting for update notice")
            .expect("Handoff closed");
        assert_eq!(notice.routing_key, "meter.m1");
        let decoded: UpdateNotice = payload::decode(notice.body.as_bytes()).unwrap();
        assert_eq!(decoded.id, "m1");
        assert!(handoff.try_recv().is_none(), "exactly one notification");

        let rows = store.readings_in_range("m1", 0.0, 2000.0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 42.0);
        assert_eq!(rows[0].state, MeterState::Value);

        let _ = stop_tx.send(true);
        worker_task.await.unwrap().expect("Worker run failed");
        viewer.stop();
        viewer.join().await;
        emitter.close().await.expect("Failed to close");
    }
}
