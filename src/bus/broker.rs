//! Broker client facade: connection/channel lifecycle over lapin.
//!
//! Thin wrapper around one AMQP connection and one channel. Declarations are
//! idempotent (create-if-absent); an existing entity with incompatible
//! kind/flags surfaces as `TopologyConflict`. The facade never retries
//! internally; retry policy belongs to callers.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info};

use super::{BusError, Result};

/// AMQP reply code for a clean connection close.
const REPLY_SUCCESS: u16 = 200;

/// One AMQP connection plus its channel.
///
/// Owned exclusively by a publisher, subscriber loop, or worker loop; the
/// broker session is the only side effect of any operation here.
pub struct Broker {
    url: String,
    connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect to the broker and open a channel.
    pub async fn open(url: &str) -> Result<Self> {
        let (connection, channel) = Self::connect(url).await?;
        info!(url = %url, "connected to AMQP broker");
        Ok(Self {
            url: url.to_string(),
            connection,
            channel,
        })
    }

    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("failed to connect to {}: {}", url, e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("failed to create channel: {}", e)))?;

        Ok((connection, channel))
    }

    /// Re-establish the connection and channel after a detected failure.
    ///
    /// Idempotent if the channel is still open. Topology is not redeclared
    /// here; callers that own topology re-declare after a successful reopen.
    pub async fn reopen(&mut self) -> Result<()> {
        if self.connection.status().connected() && self.channel.status().connected() {
            return Ok(());
        }

        debug!(url = %self.url, "reopening dropped AMQP connection");
        let (connection, channel) = Self::connect(&self.url).await?;
        self.connection = connection;
        self.channel = channel;
        Ok(())
    }

    /// Whether both the connection and the channel are currently open.
    pub fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Declare an exchange, creating it if absent.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error("exchange", name, e))
    }

    /// Declare a queue, creating it if absent, and return its effective name.
    ///
    /// An empty `name` requests a server-named, exclusive, auto-deleting
    /// queue regardless of the flags passed.
    pub async fn declare_queue(&self, name: &str, durable: bool, exclusive: bool) -> Result<String> {
        let server_named = name.is_empty();
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: durable && !server_named,
                    exclusive: exclusive || server_named,
                    auto_delete: server_named,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error("queue", name, e))?;

        Ok(queue.name().as_str().to_string())
    }

    /// Bind a queue to an exchange with a routing-key pattern.
    pub async fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("failed to bind queue {}: {}", queue, e)))?;

        debug!(queue = %queue, exchange = %exchange, routing_key = %routing_key, "bound queue");
        Ok(())
    }

    /// The underlying channel, for consume/publish/qos operations.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Close the connection, releasing all broker-side resources.
    ///
    /// Consumes the facade, so close happens exactly once.
    pub async fn close(self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "")
            .await
            .map_err(|e| BusError::Connection(format!("failed to close connection: {}", e)))
    }
}

/// Map a declare failure to the error taxonomy.
///
/// AMQP signals an incompatible redeclaration with 406 PRECONDITION-FAILED;
/// everything else on this path is a connection-level failure.
fn declare_error(entity: &str, name: &str, e: lapin::Error) -> BusError {
    let msg = format!("failed to declare {} {}: {}", entity, name, e);
    if msg.to_ascii_uppercase().contains("PRECONDITION") {
        BusError::TopologyConflict(msg)
    } else {
        BusError::Connection(msg)
    }
}
