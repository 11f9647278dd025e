//! meter-emu: meter emulator.
//!
//! Publishes a random-walk reading to the `meters` topic exchange once per
//! second, bracketed by ONLINE and OFFLINE state messages.
//!
//! Usage: meter-emu [<meter_id>] [<initial_value>]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lapin::ExchangeKind;
use rand::Rng;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambridge::bus::Publisher;
use ambridge::config::{Config, LOG_ENV_VAR};
use ambridge::payload::{self, MeterReading, MeterState};
use ambridge::routing;

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

async fn publish_reading(
    publisher: &Publisher,
    meter_id: &str,
    value: f64,
    state: MeterState,
) -> ambridge::bus::Result<()> {
    let reading = MeterReading {
        id: meter_id.to_string(),
        ts: now_ts(),
        value,
        state,
    };
    let bytes = payload::encode(&reading)?;
    publisher.publish(&bytes, &routing::meter_key(meter_id)).await
}

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

    let mut args = std::env::args().skip(1);
    let meter_id = args
        .next()
        .unwrap_or_else(|| std::process::id().to_string());
    let mut value: f64 = match args.next() {
        Some(v) => v.parse()?,
        None => rand::rng().random_range(0..=100) as f64,
    };

    let publisher = Publisher::open(
        &config.amqp.url,
        routing::METERS_EXCHANGE,
        ExchangeKind::Topic,
    )
    .await?;

    info!(meter_id = %meter_id, value, "meter emulator started (ctrl-c to exit)");
    publish_reading(&publisher, &meter_id, 0.0, MeterState::Online).await?;

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut last_value = f64::NAN;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                value = (value + rand::rng().random_range(-5..=5) as f64).clamp(0.0, 100.0);
                if value != last_value {
                    publish_reading(&publisher, &meter_id, value, MeterState::Value).await?;
                    info!(meter_id = %meter_id, value, "published reading");
                    last_value = value;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    publish_reading(&publisher, &meter_id, 0.0, MeterState::Offline).await?;
    publisher.close().await?;
    info!("meter emulator stopped");

    Ok(())
}
