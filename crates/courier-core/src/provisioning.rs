//! Create-if-absent provisioning of destinations.

use courier_transport::{
    Destination, DestinationAdmin, EntityOptions, QueueName, ReceiveSource, SubscriptionName,
    TopicName, TransportError,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Ensures destinations exist before they are first used.
///
/// Newly created entities get the TTL, idle and delivery settings of the
/// bus; existing ones are left untouched.
pub struct Provisioner {
    admin: Arc<dyn DestinationAdmin>,
    options: EntityOptions,
}

impl Provisioner {
    pub fn new(admin: Arc<dyn DestinationAdmin>, options: EntityOptions) -> Self {
        Self { admin, options }
    }

    /// Management collaborator used for existence checks and deletion
    pub fn admin(&self) -> &Arc<dyn DestinationAdmin> {
        &self.admin
    }

    /// Ensure an outbound destination exists
    pub async fn ensure_destination(&self, destination: &Destination) -> Result<(), TransportError> {
        match destination {
            Destination::Queue(queue) => self.ensure_queue(queue).await,
            Destination::Topic(topic) => self.ensure_topic(topic).await,
        }
    }

    /// Ensure an inbound source exists, including the topic of a subscription
    pub async fn ensure_source(&self, source: &ReceiveSource) -> Result<(), TransportError> {
        match source {
            ReceiveSource::Queue(queue) => self.ensure_queue(queue).await,
            ReceiveSource::Subscription {
                topic,
                subscription,
            } => {
                self.ensure_topic(topic).await?;
                self.ensure_subscription(topic, subscription).await
            }
        }
    }

    pub async fn ensure_queue(&self, queue: &QueueName) -> Result<(), TransportError> {
        if self.admin.queue_exists(queue).await? {
            debug!(queue = %queue, "Queue already exists");
            return Ok(());
        }

        if self.admin.create_queue(queue, &self.options).await? {
            info!(
                queue = %queue,
                ttl_secs = self.options.default_message_ttl.as_secs(),
                max_delivery_count = self.options.max_delivery_count,
                "Queue created"
            );
        }
        Ok(())
    }

    pub async fn ensure_topic(&self, topic: &TopicName) -> Result<(), TransportError> {
        if self.admin.topic_exists(topic).await? {
            debug!(topic = %topic, "Topic already exists");
            return Ok(());
        }

        if self.admin.create_topic(topic, &self.options).await? {
            info!(
                topic = %topic,
                ttl_secs = self.options.default_message_ttl.as_secs(),
                "Topic created"
            );
        }
        Ok(())
    }

    pub async fn ensure_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<(), TransportError> {
        if self.admin.subscription_exists(topic, subscription).await? {
            debug!(topic = %topic, subscription = %subscription, "Subscription already exists");
            return Ok(());
        }

        if self
            .admin
            .create_subscription(topic, subscription, &self.options)
            .await?
        {
            info!(topic = %topic, subscription = %subscription, "Subscription created");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "provisioning_tests.rs"]
mod tests;
