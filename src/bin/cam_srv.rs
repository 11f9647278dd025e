//! cam-srv: camera capture worker.
//!
//! Start tasks arrive round-robin through the durable `cam_tasks_queue` on
//! the `cam_tasks` topic exchange; stop commands arrive on the `cam_stop`
//! fanout exchange so every worker sees them and can stop its own capture
//! subprocess. Captures are external processes (ffmpeg by default) managed
//! per camera id.

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambridge::bus::{DurableWorker, WorkerConfig};
use ambridge::capture::{CamTaskHandler, CaptureConfig};
use ambridge::config::{Config, LOG_ENV_VAR};
use ambridge::routing;

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

    let handler = CamTaskHandler::new(CaptureConfig::default());

    let worker = DurableWorker::connect(WorkerConfig {
        url: config.amqp.url.clone(),
        exchange: routing::CAM_TASKS_EXCHANGE.to_string(),
        queue: routing::CAM_TASKS_QUEUE.to_string(),
        binding: routing::all_of(routing::CAM_TASK_FACILITY),
        control_exchange: Some(routing::CAM_STOP_EXCHANGE.to_string()),
    })
    .await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested");
            let _ = stop_tx.send(true);
        }
    });

    info!("worker started, waiting for camera tasks (ctrl-c to exit)");
    let outcome = worker.run(&handler, stop_rx).await;

    // Leave no orphaned capture processes behind.
    handler.shutdown().await;
    info!("worker stopped");

    outcome.map_err(Into::into)
}
