//! ambridge - Reliable AMQP message bridge
//!
//! Distributes small, timestamped event messages (meter readings, camera
//! start/stop commands, chat lines, change notifications) between independent
//! processes through a RabbitMQ broker, and durably persists a subset of them.
//!
//! The core is the `bus` module: a producer/consumer abstraction that isolates
//! broker I/O on dedicated tasks, hands inbound messages to application logic
//! through a thread-safe queue, and implements at-least-once delivery with
//! explicit ack/requeue against a durable work queue.

pub mod bus;
pub mod capture;
pub mod config;
pub mod meters;
pub mod payload;
pub mod routing;
pub mod store;
