//! Durable worker loop: at-least-once consumption from a shared work queue.
//!
//! Multiple worker processes bind the same durable queue name and the broker
//! round-robins deliveries between them; prefetch=1 keeps one job in flight
//! per worker and makes the distribution fair for long-running jobs.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions, BasicRejectOptions,
    },
    types::FieldTable,
    Consumer, ExchangeKind,
};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{Broker, BusError, Result};
use crate::payload;

/// Topology for a durable worker: a named shared queue on a topic exchange,
/// optionally paired with a fanout control exchange for out-of-band signals.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange the work queue binds to.
    pub exchange: String,
    /// Durable, named, shared queue (same name across the worker pool).
    pub queue: String,
    /// Wildcard binding pattern (e.g. "meter.#").
    pub binding: String,
    /// Fanout exchange for broadcast control messages, if any. Each worker
    /// gets its own exclusive anonymous queue on it.
    pub control_exchange: Option<String>,
}

/// Application logic invoked per delivery.
///
/// `handle` failures are treated as recoverable: the delivery is returned to
/// the queue and redelivered until it succeeds or an operator intervenes.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Decoded job payload type.
    type Job: DeserializeOwned + Send;

    /// Process one job from the work queue.
    async fn handle(&self, routing_key: &str, job: Self::Job) -> Result<()>;

    /// Process one out-of-band control message. Already acknowledged when
    /// called; failures are logged, never requeued.
    async fn handle_control(&self, _routing_key: &str, _job: Self::Job) -> Result<()> {
        Ok(())
    }
}

/// At-least-once consumer over a durable, load-balanced queue.
pub struct DurableWorker {
    broker: Broker,
    work: Consumer,
    control: Option<Consumer>,
    queue: String,
}

impl DurableWorker {
    /// Declare the topology and register the consumer(s).
    ///
    /// Declarations are idempotent; a kind/flag mismatch with existing
    /// topology surfaces as `TopologyConflict`.
    pub async fn connect(config: WorkerConfig) -> Result<Self> {
        let broker = Broker::open(&config.url).await?;

        broker
            .declare_exchange(&config.exchange, ExchangeKind::Topic)
            .await?;
        let queue = broker.declare_queue(&config.queue, true, false).await?;
        broker.bind(&queue, &config.exchange, &config.binding).await?;

        // One unacknowledged delivery at a time: fair round-robin across
        // the worker pool, and no second job until the first is settled.
        broker
            .channel()
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to set prefetch: {}", e)))?;

        let work = broker
            .channel()
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to start consumer: {}", e)))?;

        let control = match &config.control_exchange {
            Some(exchange) => {
                broker
                    .declare_exchange(exchange, ExchangeKind::Fanout)
                    .await?;
                let control_queue = broker.declare_queue("", false, true).await?;
                broker.bind(&control_queue, exchange, "").await?;
                let consumer = broker
                    .channel()
                    .basic_consume(
                        &control_queue,
                        "",
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BusError::Subscribe(format!("failed to start control consumer: {}", e))
                    })?;
                Some(consumer)
            }
            None => None,
        };

        info!(
            exchange = %config.exchange,
            queue = %queue,
            binding = %config.binding,
            control = config.control_exchange.as_deref().unwrap_or("-"),
            "worker connected"
        );

        Ok(Self {
            broker,
            work,
            control,
            queue,
        })
    }

    /// Run the loop on the caller's task until the stop signal is set or the
    /// connection drops.
    ///
    /// The in-flight delivery is always settled (ack xor nack) before the
    /// loop exits; no message is abandoned mid-flight. A dropped connection
    /// ends the loop with `Connection` so the owning process can decide
    /// whether to restart.
    pub async fn run<H: JobHandler>(
        self,
        handler: &H,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let Self {
            broker,
            mut work,
            mut control,
            queue,
        } = self;

        let mut outcome = Ok(());
        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                delivery = work.next() => match delivery {
                    Some(Ok(delivery)) => process_work(handler, delivery).await,
                    Some(Err(e)) => {
                        outcome = Err(BusError::Connection(format!(
                            "work consumer failed: {}", e
                        )));
                        break;
                    }
                    None => {
                        outcome = Err(BusError::Connection(
                            "work consumer stream ended".to_string(),
                        ));
                        break;
                    }
                },
                delivery = next_control(control.as_mut()), if control.is_some() => match delivery {
                    Some(Ok(delivery)) => process_control(handler, delivery).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "control consumer failed, disabling control binding");
                        control = None;
                    }
                    None => {
                        warn!("control consumer stream ended, disabling control binding");
                        control = None;
                    }
                },
            }
        }

        let work_tag = work.tag();
        if let Err(e) = broker
            .channel()
            .basic_cancel(work_tag.as_str(), BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "failed to cancel work consumer");
        }
        if let Some(control) = &control {
            let tag = control.tag();
            if let Err(e) = broker
                .channel()
                .basic_cancel(tag.as_str(), BasicCancelOptions::default())
                .await
            {
                warn!(error = %e, "failed to cancel control consumer");
            }
        }
        if let Err(e) = broker.close().await {
            warn!(error = %e, "failed to close worker connection");
        }

        info!(queue = %queue, "worker stopped");
        outcome
    }
}

async fn next_control(
    consumer: Option<&mut Consumer>,
) -> Option<lapin::Result<Delivery>> {
    match consumer {
        Some(consumer) => consumer.next().await,
        None => std::future::pending().await,
    }
}

/// Settle one work delivery: exactly one terminal decision per delivery.
///
/// Handler failures are contained here and never crash the loop.
async fn process_work<H: JobHandler>(handler: &H, delivery: Delivery) {
    let routing_key = delivery.routing_key.as_str().to_string();

    match payload::decode::<H::Job>(&delivery.data) {
        Err(e) => {
            // A payload that cannot decode now never will; requeueing it
            // would redeliver forever.
            warn!(routing_key = %routing_key, error = %e, "rejecting undecodable job");
            if let Err(e) = delivery.reject(BasicRejectOptions::default()).await {
                error!(error = %e, "failed to reject message");
            }
        }
        Ok(job) => match handler.handle(&routing_key, job).await {
            Ok(()) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %e, "failed to ack message");
                }
            }
            Err(e) => {
                warn!(routing_key = %routing_key, error = %e, "handler failed, requeueing job");
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                {
                    error!(error = %e, "failed to nack message");
                }
            }
        },
    }
}

/// Settle one control delivery: acknowledged immediately, then applied to
/// local state without blocking the work stream.
async fn process_control<H: JobHandler>(handler: &H, delivery: Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "failed to ack control message");
    }

    let routing_key = delivery.routing_key.as_str().to_string();
    match payload::decode::<H::Job>(&delivery.data) {
        Err(e) => {
            warn!(routing_key = %routing_key, error = %e, "dropping undecodable control message");
        }
        Ok(job) => {
            if let Err(e) = handler.handle_control(&routing_key, job).await {
                warn!(routing_key = %routing_key, error = %e, "control handler failed");
            }
        }
    }
}
