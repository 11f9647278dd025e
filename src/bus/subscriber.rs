//! Subscriber loop: consumes from the broker on a dedicated task and
//! forwards decoded messages to a handoff queue.

use std::time::Duration;

use futures::StreamExt;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Consumer, ExchangeKind,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handoff::{handoff_channel, HandoffSender};
use super::{Broker, BusError, Handoff, InboundMessage, Result};

/// Upper bound on how long the loop runs without re-checking the stop flag,
/// even if no stop signal or delivery arrives.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Topology and binding for one subscription session.
#[derive(Clone, Debug)]
pub struct SubscribeConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Exchange to bind against (declared idempotently).
    pub exchange: String,
    /// Exchange kind; topic for filtered delivery, fanout for broadcast.
    pub kind: ExchangeKind,
    /// Fixed queue name, or `None` for an exclusive server-named
    /// auto-deleting queue (only active listeners see messages, no backlog).
    pub queue: Option<String>,
    /// Binding routing-key pattern (ignored by fanout exchanges).
    pub routing_key: String,
}

impl SubscribeConfig {
    /// Broadcast listener: fanout exchange, ephemeral server-named queue.
    pub fn broadcast(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            kind: ExchangeKind::Fanout,
            queue: None,
            routing_key: String::new(),
        }
    }

    /// Filtered listener: topic exchange, ephemeral server-named queue.
    pub fn topic(
        url: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            kind: ExchangeKind::Topic,
            queue: None,
            routing_key: routing_key.into(),
        }
    }
}

/// Control handle for a running subscriber loop.
///
/// Dropping the handle also stops the loop.
pub struct SubscriberHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Set the stop flag. Safe from any thread; the loop observes it within
    /// one idle tick and tears the session down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Fire-and-forget subscription: messages are auto-acknowledged on receipt.
///
/// At-most-once from the broker's perspective once received; no redelivery
/// if the consuming application crashes after receipt. The durable path is
/// `DurableWorker`, not this.
pub struct Subscriber;

impl Subscriber {
    /// Declare the topology, start consuming on a dedicated task, and return
    /// the control handle plus the handoff queue.
    ///
    /// Setup errors (unreachable broker, topology conflict) surface here,
    /// synchronously on the caller's task.
    pub async fn spawn(config: SubscribeConfig) -> Result<(SubscriberHandle, Handoff)> {
        let broker = Broker::open(&config.url).await?;
        broker
            .declare_exchange(&config.exchange, config.kind.clone())
            .await?;

        let queue = match &config.queue {
            Some(name) => broker.declare_queue(name, false, false).await?,
            None => broker.declare_queue("", false, true).await?,
        };
        broker
            .bind(&queue, &config.exchange, &config.routing_key)
            .await?;

        let consumer = broker
            .channel()
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to start consumer: {}", e)))?;

        info!(
            exchange = %config.exchange,
            queue = %queue,
            routing_key = %config.routing_key,
            "subscriber started"
        );

        let (tx, handoff) = handoff_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(consume_loop(broker, consumer, tx, stop_rx));

        Ok((SubscriberHandle { stop_tx, task }, handoff))
    }
}

async fn consume_loop(
    broker: Broker,
    mut consumer: Consumer,
    tx: HandoffSender,
    mut stop: watch::Receiver<bool>,
) {
    let mut idle = tokio::time::interval(IDLE_TICK);
    idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *stop.borrow() {
            break;
        }

        tokio::select! {
            changed = stop.changed() => {
                // Sender dropped means the handle is gone; stop either way.
                if changed.is_err() {
                    break;
                }
            }
            _ = idle.tick() => {}
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => forward(delivery, &tx),
                Some(Err(e)) => {
                    error!(error = %e, "consumer stream failed, ending loop");
                    break;
                }
                None => {
                    warn!("consumer stream ended, ending loop");
                    break;
                }
            },
        }
    }

    teardown(broker, &consumer).await;
}

/// Decode one auto-acked delivery and push it onto the handoff queue.
fn forward(delivery: lapin::message::Delivery, tx: &HandoffSender) {
    // Empty body is a heartbeat/no-op ping, not an error.
    if delivery.data.is_empty() {
        return;
    }

    let routing_key = delivery.routing_key.as_str().to_string();
    match std::str::from_utf8(&delivery.data) {
        Ok(body) => {
            debug!(routing_key = %routing_key, "received message");
            let _ = tx.send(InboundMessage {
                routing_key,
                body: body.to_string(),
            });
        }
        Err(e) => {
            // Dropped, already acked; a bad payload must not end the loop.
            warn!(routing_key = %routing_key, error = %e, "dropping non-UTF-8 payload");
        }
    }
}

async fn teardown(broker: Broker, consumer: &Consumer) {
    let tag = consumer.tag();
    if let Err(e) = broker
        .channel()
        .basic_cancel(tag.as_str(), BasicCancelOptions::default())
        .await
    {
        warn!(error = %e, "failed to cancel consumer");
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "failed to close subscriber connection");
    }
    info!("subscriber stopped");
}
