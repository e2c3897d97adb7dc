//! Transport traits implemented by managed queue service clients.

use crate::error::TransportError;
use crate::message::{
    Destination, MessageBatch, MessageId, QueueName, ReceiveSource, ReceivedMessage,
    SubscriptionName, TopicName, WireMessage,
};
use crate::provider::EntityOptions;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Consumption mode of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Messages are removed from the source as soon as they are fetched
    ReceiveAndDelete,
    /// Messages are locked and must be settled explicitly
    PeekLock,
}

/// Entry point of a transport: creates senders and receivers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a sender bound to one destination
    async fn create_sender(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn MessageSender>, TransportError>;

    /// Create a pull-mode receiver bound to a queue or a subscription
    async fn create_receiver(
        &self,
        source: &ReceiveSource,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, TransportError>;
}

/// Outbound handle bound to one destination
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Unique identifier of this sender instance
    fn identifier(&self) -> &str;

    /// Destination this sender writes to
    fn destination(&self) -> &Destination;

    /// Send a single message
    async fn send_message(&self, message: WireMessage) -> Result<MessageId, TransportError>;

    /// Create an empty batch sized for this destination
    async fn create_batch(&self) -> Result<Box<dyn MessageBatch>, TransportError>;

    /// Send all messages of a batch in one call
    async fn send_batch(
        &self,
        batch: Box<dyn MessageBatch>,
    ) -> Result<Vec<MessageId>, TransportError>;

    /// Release the sender
    async fn close(&self) -> Result<(), TransportError>;
}

/// Inbound handle bound to a queue or a subscription
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Source this receiver reads from
    fn source(&self) -> &ReceiveSource;

    /// Fetch up to `max_messages`, waiting at most `timeout` for the first one.
    ///
    /// An empty result means nothing arrived within the timeout.
    async fn receive_messages(
        &self,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Release the receiver
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the receiver was closed
    fn is_closed(&self) -> bool;
}

/// Destination lifecycle operations of the management API
#[async_trait]
pub trait DestinationAdmin: Send + Sync {
    /// Check if a queue exists
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, TransportError>;

    /// Check if a topic exists
    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, TransportError>;

    /// Check if a subscription exists
    async fn subscription_exists(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<bool, TransportError>;

    /// Create a queue unless it exists; returns `true` when created
    async fn create_queue(
        &self,
        queue: &QueueName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError>;

    /// Create a topic unless it exists; returns `true` when created
    async fn create_topic(
        &self,
        topic: &TopicName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError>;

    /// Create a subscription unless it exists; returns `true` when created
    async fn create_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError>;

    /// Delete a queue; returns `false` when it did not exist
    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, TransportError>;

    /// Delete a topic and its subscriptions; returns `false` when it did not exist
    async fn delete_topic(&self, topic: &TopicName) -> Result<bool, TransportError>;

    /// Delete a subscription; returns `false` when it did not exist
    async fn delete_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<bool, TransportError>;
}
