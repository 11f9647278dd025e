//! meters-srv: meter persistence worker.
//!
//! Consumes meter readings from the `meters` topic exchange through the
//! durable shared queue `meters_db_queue` (run several instances for
//! horizontal scaling; the broker round-robins between them), inserts each
//! reading into the SQLite store, and republishes an update notice on
//! `meters_db_updates` for live viewers.

use lapin::ExchangeKind;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambridge::bus::{DurableWorker, Publisher, WorkerConfig};
use ambridge::config::{Config, LOG_ENV_VAR};
use ambridge::meters::MeterDbHandler;
use ambridge::routing;
use ambridge::store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().map_err(|e| {
        error!("failed to load configuration: {}", e);
        e
    })?;

    let store = store::init_store(&config.storage).await?;

    let notifier = Publisher::open(
        &config.amqp.url,
        routing::METERS_UPDATES_EXCHANGE,
        ExchangeKind::Topic,
    )
    .await?;
    let handler = MeterDbHandler::new(store, notifier);

    let worker = DurableWorker::connect(WorkerConfig {
        url: config.amqp.url.clone(),
        exchange: routing::METERS_EXCHANGE.to_string(),
        queue: routing::METERS_DB_QUEUE.to_string(),
        binding: routing::all_of(routing::METER_FACILITY),
        control_exchange: None,
    })
    .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested");
            let _ = stop_tx.send(true);
        }
    });

    info!("worker started, waiting for meter readings (ctrl-c to exit)");
    worker.run(&handler, stop_rx).await?;
    info!("worker stopped");

    Ok(())
}
