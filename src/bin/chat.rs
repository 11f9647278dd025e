//! chat: terminal chat over the `chat` topic exchange.
//!
//! Every participant publishes lines and subscribes through an exclusive
//! server-named queue, so all running instances see all messages. Enter and
//! quit are echoed to the room.
//!
//! Usage: chat [<user_name>]

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambridge::bus::{Publisher, SubscribeConfig, Subscriber};
use ambridge::config::{Config, LOG_ENV_VAR};
use ambridge::routing;
use lapin::ExchangeKind;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().map_err(|e| {
        error!("failed to load configuration: {}", e);
        e
    })?;

    let user_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("username-{}", std::process::id()));

    // Messages published to the chat exchange carry an empty routing key, so
    // the subscription binds with the same.
    let (handle, mut handoff) = Subscriber::spawn(SubscribeConfig {
        url: config.amqp.url.clone(),
        exchange: routing::CHAT_EXCHANGE.to_string(),
        kind: ExchangeKind::Topic,
        queue: None,
        routing_key: String::new(),
    })
    .await?;

    let publisher = Publisher::open(
        &config.amqp.url,
        routing::CHAT_EXCHANGE,
        ExchangeKind::Topic,
    )
    .await?;

    println!("* chatting as {} (ctrl-d or ctrl-c to quit)", user_name);
    publisher
        .publish(format!("{{enter}} {}", user_name).as_bytes(), "")
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    let message = format!("{}> {}", user_name, line);
                    publisher.publish(message.as_bytes(), "").await?;
                }
                None => break, // stdin closed
            },
            inbound = handoff.recv() => match inbound {
                Some(message) => println!("{}", message.body),
                None => break, // subscriber loop ended
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Echo the quit; it also nudges other participants' consumers.
    publisher
        .publish(format!("{{quit}} {}", user_name).as_bytes(), "")
        .await?;

    handle.stop();
    handle.join().await;
    publisher.close().await?;

    Ok(())
}
