//! Structured dispatch events.
//!
//! Failures on the send and receive paths never reach the producer or the
//! receiver loop's caller. Each one is logged and also published here so
//! callers and tests can observe it.

use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers lose the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something noteworthy that happened while dispatching messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A batch was sent in one wire call
    BatchSent { destination: String, count: usize },

    /// A batch send failed; its messages are lost
    BatchSendFailed {
        destination: String,
        count: usize,
        error: String,
    },

    /// A message was dropped before it reached the wire
    MessageDropped { destination: String, reason: String },

    /// A strategy failed to send a message
    SendFailed {
        destination: String,
        strategy: String,
        error: String,
    },

    /// A received message was skipped
    InboundDropped {
        destination: String,
        subscription: Option<String>,
        reason: String,
    },

    /// A receiver loop terminated on a transport error
    ReceiverStopped {
        destination: String,
        subscription: Option<String>,
        error: String,
    },
}

/// Publishing side of the event channel
#[derive(Debug, Clone)]
pub(crate) struct EventPublisher {
    sender: broadcast::Sender<DispatchEvent>,
}

impl EventPublisher {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn publish(&self, event: DispatchEvent) {
        // No subscriber is not an error
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
