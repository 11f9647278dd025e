//! Message bridge over an AMQP broker.
//!
//! This module contains:
//! - `Broker`: connection/channel lifecycle facade
//! - `Publisher`: best-effort publish with routing key
//! - `Subscriber`: auto-ack consume loop on a dedicated task
//! - `Handoff`: thread-safe FIFO from the subscriber task to the application
//! - `DurableWorker` + `JobHandler`: at-least-once work queue consumption

pub mod broker;
pub mod handoff;
pub mod publisher;
pub mod subscriber;
pub mod worker;

pub use broker::Broker;
pub use handoff::{Handoff, InboundMessage};
pub use publisher::Publisher;
pub use subscriber::{Subscriber, SubscriberHandle, SubscribeConfig};
pub use worker::{DurableWorker, JobHandler, WorkerConfig};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
///
/// Bridge-level errors (`Connection`, `TopologyConflict`) are fatal to the
/// owning loop; `Decode` and `Handler` are contained per-message.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("handler failed: {0}")]
    Handler(String),
}
