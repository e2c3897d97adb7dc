//! Background receiver loops.
//!
//! One loop runs per registered queue or subscription. It provisions its
//! source, opens a receive-and-remove receiver and polls until cancelled.
//! Failures of a single message are logged and skipped; a transport error
//! ends the loop.

use crate::events::{DispatchEvent, EventPublisher};
use crate::handler::MessageHandler;
use crate::provisioning::Provisioner;
use courier_transport::{ReceiveMode, ReceiveSource, ReceivedMessage, Transport};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Shared collaborators and poll settings of receiver loops
#[derive(Clone)]
pub(crate) struct ReceiverRuntime {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) provisioner: Arc<Provisioner>,
    pub(crate) events: EventPublisher,
    pub(crate) max_messages: u32,
    pub(crate) poll_timeout: Duration,
}

/// Handle of a running receiver loop
#[derive(Debug)]
pub struct ReceiverHandle {
    source: ReceiveSource,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn source(&self) -> &ReceiveSource {
        &self.source
    }

    /// Check if the loop has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop at its next poll boundary and wait for it
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(source = %self.source, error = %e, "Receiver loop task failed");
        }
    }
}

/// Receiver loop bound to one source and one handler type
pub(crate) struct ReceiverLoop<H: MessageHandler> {
    source: ReceiveSource,
    handler: Arc<H>,
    runtime: ReceiverRuntime,
    cancel: CancellationToken,
}

impl<H: MessageHandler> ReceiverLoop<H> {
    pub(crate) fn spawn(
        source: ReceiveSource,
        handler: Arc<H>,
        runtime: ReceiverRuntime,
        cancel: CancellationToken,
    ) -> ReceiverHandle {
        let receiver_loop = Self {
            source: source.clone(),
            handler,
            runtime,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(receiver_loop.run());

        ReceiverHandle {
            source,
            cancel,
            task,
        }
    }

    async fn run(self) {
        if let Err(e) = self.runtime.provisioner.ensure_source(&self.source).await {
            error!(source = %self.source, error = %e, "Provisioning receiver source failed");
            self.stopped(e.to_string());
            return;
        }

        let receiver = match self
            .runtime
            .transport
            .create_receiver(&self.source, ReceiveMode::ReceiveAndDelete)
            .await
        {
            Ok(receiver) => receiver,
            Err(e) => {
                error!(source = %self.source, error = %e, "Creating receiver failed");
                self.stopped(e.to_string());
                return;
            }
        };

        info!(source = %self.source, "Receiver loop started");

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = receiver.receive_messages(
                    self.runtime.max_messages,
                    self.runtime.poll_timeout,
                ) => result,
            };

            match received {
                Ok(messages) => {
                    for message in messages {
                        self.dispatch(message).await;
                    }
                }
                Err(e) => {
                    error!(source = %self.source, error = %e, "Receiving messages failed, stopping receiver loop");
                    self.stopped(e.to_string());
                    break;
                }
            }
        }

        if let Err(e) = receiver.close().await {
            warn!(source = %self.source, error = %e, "Closing receiver failed");
        }
        info!(source = %self.source, "Receiver loop stopped");
    }

    async fn dispatch(&self, message: ReceivedMessage) {
        let Some(decoded) =
            decode_message::<H::Message>(&self.source, &self.runtime.events, &message)
        else {
            return;
        };

        trace!(source = %self.source, message_id = %message.message_id, "Dispatching message");
        match self.handler.process_message(decoded, &self.cancel).await {
            Ok(()) => debug!(source = %self.source, message_id = %message.message_id, "Message processed"),
            Err(e) => {
                error!(
                    source = %self.source,
                    message_id = %message.message_id,
                    error = %e,
                    "Handler failed to process message"
                );
                self.dropped(format!("handler failed: {}", e));
            }
        }
    }

    fn dropped(&self, reason: String) {
        self.runtime.events.publish(DispatchEvent::InboundDropped {
            destination: self.source.entity_name().to_string(),
            subscription: self.source.subscription_name().map(str::to_string),
            reason,
        });
    }

    fn stopped(&self, error: String) {
        self.runtime.events.publish(DispatchEvent::ReceiverStopped {
            destination: self.source.entity_name().to_string(),
            subscription: self.source.subscription_name().map(str::to_string),
            error,
        });
    }
}

/// Decode a received body, or log, publish `InboundDropped` and return `None`
pub(crate) fn decode_message<T: DeserializeOwned>(
    source: &ReceiveSource,
    events: &EventPublisher,
    message: &ReceivedMessage,
) -> Option<T> {
    let reason = if message.body.is_empty() {
        warn!(
            source = %source,
            message_id = %message.message_id,
            "Received message with empty body"
        );
        "empty body".to_string()
    } else {
        match serde_json::from_slice(&message.body) {
            Ok(decoded) => return Some(decoded),
            Err(e) => {
                error!(
                    source = %source,
                    message_id = %message.message_id,
                    error = %e,
                    "Decoding message failed"
                );
                format!("decode failed: {}", e)
            }
        }
    };

    events.publish(DispatchEvent::InboundDropped {
        destination: source.entity_name().to_string(),
        subscription: source.subscription_name().map(str::to_string),
        reason,
    });
    None
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
