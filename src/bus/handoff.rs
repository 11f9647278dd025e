//! Inter-thread handoff queue between a subscriber loop and its consumer.

use tokio::sync::mpsc;

/// A decoded message forwarded from a subscriber loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Routing key the message arrived with.
    pub routing_key: String,
    /// UTF-8 decoded payload.
    pub body: String,
}

pub(crate) type HandoffSender = mpsc::UnboundedSender<InboundMessage>;

/// Consumer end of the handoff queue.
///
/// Unbounded by design: the subscriber loop never blocks on a slow consumer,
/// at the cost of unbounded memory growth if the consumer stalls. Acceptable
/// at demo scale; a production deployment would want a bounded channel with
/// an explicit overflow policy.
pub struct Handoff {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

pub(crate) fn handoff_channel() -> (HandoffSender, Handoff) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Handoff { rx })
}

impl Handoff {
    /// Wait for the next message. Returns `None` once the subscriber loop
    /// has exited and the queue is drained.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Pop one message without waiting.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently queued.
    ///
    /// This is the fixed-timer polling pattern: the owning loop calls it on
    /// an interval and processes whatever has accumulated.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}
