//! The service bus: dispatch router and public entry point.
//!
//! Outbound requests are prefixed, validated and handed to the strategy
//! resolved for their destination. Strategy failures never reach the
//! producer as errors; they are logged, published as
//! [`DispatchEvent::SendFailed`] and reported as [`SendOutcome::Failed`].
//! The only error a producer sees is a misconfigured strategy name.

use crate::builder::BusConfiguration;
use crate::error::{BusError, BusResult};
use crate::events::{DispatchEvent, EventPublisher};
use crate::provisioning::Provisioner;
use crate::receiver::{decode_message, ReceiverHandle, ReceiverRuntime};
use crate::registry::ReaderRegistry;
use crate::request::{MessageOptions, MessageRequest};
use crate::sender_cache::SenderCache;
use crate::strategy::{SendContext, SendOutcome, SendStrategy, StrategyStats};
use courier_transport::{
    Destination, DestinationAdmin, DestinationKind, QueueName, ReceiveMode, ReceiveSource,
    SubscriptionName, TopicName, Transport,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Messages fetched per call while clearing a destination
const CLEAR_FETCH_SIZE: u32 = 100;

/// Wait per fetch while clearing; an empty fetch ends the clear
const CLEAR_FETCH_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound on fetches of one clear call
const CLEAR_MAX_FETCHES: usize = 10_000;

/// Client-side dispatch engine over a managed queue service
pub struct ServiceBus {
    config: Arc<BusConfiguration>,
    transport: Arc<dyn Transport>,
    provisioner: Arc<Provisioner>,
    senders: Arc<SenderCache>,
    strategies: HashMap<String, Arc<dyn SendStrategy>>,
    registry: Arc<ReaderRegistry>,
    events: EventPublisher,
    shutdown: CancellationToken,
    receivers: Mutex<Vec<ReceiverHandle>>,
}

impl ServiceBus {
    pub(crate) fn new(
        config: Arc<BusConfiguration>,
        transport: Arc<dyn Transport>,
        admin: Arc<dyn DestinationAdmin>,
        strategies: HashMap<String, Arc<dyn SendStrategy>>,
        registry: Arc<ReaderRegistry>,
        events: EventPublisher,
    ) -> Self {
        let provisioner = Arc::new(Provisioner::new(admin, config.settings().entity_options()));
        let senders = Arc::new(SenderCache::new(
            Arc::clone(&transport),
            Arc::clone(&provisioner),
        ));

        Self {
            config,
            transport,
            provisioner,
            senders,
            strategies,
            registry,
            events,
            shutdown: CancellationToken::new(),
            receivers: Mutex::new(Vec::new()),
        }
    }

    pub fn configuration(&self) -> &BusConfiguration {
        &self.config
    }

    /// Subscribe to dispatch events published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Receiver lifecycle
    // ========================================================================

    /// Start a receiver loop for every registration not yet wired.
    ///
    /// Returns the number of loops started; calling it again starts none.
    pub async fn start(&self) -> usize {
        let runtime = ReceiverRuntime {
            transport: Arc::clone(&self.transport),
            provisioner: Arc::clone(&self.provisioner),
            events: self.events.clone(),
            max_messages: self.config.settings().receive_message_buffer_size,
            poll_timeout: self.config.settings().receive_timeout(),
        };

        let mut receivers = self.receivers.lock().await;
        let before = receivers.len();
        for registration in self.registry.registrations() {
            if let Some(handle) = registration.wire(&runtime, &self.shutdown) {
                debug!(source = %handle.source(), "Receiver loop wired");
                receivers.push(handle);
            }
        }

        let started = receivers.len() - before;
        info!(started = started, total = receivers.len(), "Receiver loops started");
        started
    }

    /// Number of receiver loops still running
    pub async fn running_receivers(&self) -> usize {
        self.receivers
            .lock()
            .await
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Push out every message still held back by a strategy
    pub async fn flush(&self) {
        for strategy in self.strategies.values() {
            strategy.flush().await;
        }
    }

    /// Stop receiver loops, flush strategies and close cached senders
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let receivers: Vec<ReceiverHandle> = self.receivers.lock().await.drain(..).collect();
        for handle in receivers {
            handle.stop().await;
        }

        self.flush().await;
        self.senders.close_all().await;
        info!("Service bus shut down");
    }

    // ========================================================================
    // Send path
    // ========================================================================

    /// Send a serializable payload to a queue
    pub async fn send_to_queue<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        options: Option<MessageOptions>,
    ) -> BusResult<SendOutcome> {
        self.send_typed(DestinationKind::Queue, queue, payload, options)
            .await
    }

    /// Publish a serializable payload to a topic
    pub async fn publish_to_topic<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        options: Option<MessageOptions>,
    ) -> BusResult<SendOutcome> {
        self.send_typed(DestinationKind::Topic, topic, payload, options)
            .await
    }

    async fn send_typed<T: Serialize>(
        &self,
        kind: DestinationKind,
        name: &str,
        payload: &T,
        options: Option<MessageOptions>,
    ) -> BusResult<SendOutcome> {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(destination = name, error = %e, "Serializing message payload failed");
                return Ok(self.drop_request(name, format!("serialization failed: {}", e)));
            }
        };

        let mut request = MessageRequest::new(kind, name, payload);
        if let Some(options) = options {
            request = request.with_options(options);
        }
        self.send(request).await
    }

    /// Dispatch a request through the strategy of its destination
    pub async fn send(&self, request: MessageRequest) -> BusResult<SendOutcome> {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch a request; `cancel` is honoured until the message is handed over
    pub async fn send_with_cancel(
        &self,
        request: MessageRequest,
        cancel: &CancellationToken,
    ) -> BusResult<SendOutcome> {
        if let Some(reason) = request.rejection_reason() {
            warn!(
                destination = request.destination_name(),
                reason = reason,
                "Message request rejected"
            );
            return Ok(self.drop_request(request.destination_name(), reason.to_string()));
        }

        let request = request.with_prefix(&self.config.settings().prefix_name);
        let destination = match request.kind() {
            DestinationKind::Queue => Destination::queue(request.destination_name()),
            DestinationKind::Topic => Destination::topic(request.destination_name()),
        };
        let destination = match destination {
            Ok(destination) => destination,
            Err(e) => {
                warn!(
                    destination = request.destination_name(),
                    error = %e,
                    "Invalid destination name"
                );
                return Ok(self.drop_request(request.destination_name(), e.to_string()));
            }
        };

        let strategy = self.resolve_strategy(destination.name())?;
        trace!(destination = %destination, strategy = strategy.name(), "Dispatching message");

        let context = SendContext {
            senders: &self.senders,
            cancel,
        };
        match strategy.try_send(&destination, &request, &context).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    destination = %destination,
                    strategy = strategy.name(),
                    error = %e,
                    "Sending message failed"
                );
                self.events.publish(DispatchEvent::SendFailed {
                    destination: destination.name().to_string(),
                    strategy: strategy.name().to_string(),
                    error: e.to_string(),
                });
                Ok(SendOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    fn resolve_strategy(&self, destination: &str) -> BusResult<&Arc<dyn SendStrategy>> {
        let name = self.config.strategy_for(destination);
        self.strategies
            .get(&name)
            .ok_or(BusError::UnknownStrategy { name })
    }

    fn drop_request(&self, destination: &str, reason: String) -> SendOutcome {
        self.events.publish(DispatchEvent::MessageDropped {
            destination: destination.to_string(),
            reason: reason.clone(),
        });
        SendOutcome::Skipped { reason }
    }

    /// Counters of a strategy, looked up case-insensitively
    pub fn strategy_stats(&self, strategy: &str) -> Option<StrategyStats> {
        self.strategies
            .get(&strategy.to_lowercase())
            .map(|strategy| strategy.stats())
    }

    // ========================================================================
    // One-shot receive and clear
    // ========================================================================

    /// Fetch up to `max_messages` from a queue once.
    ///
    /// Empty or undecodable messages are consumed, logged and skipped.
    pub async fn receive<T: DeserializeOwned>(
        &self,
        queue: &str,
        max_messages: u32,
        timeout: Duration,
    ) -> BusResult<Vec<T>> {
        let source = self.queue_source(queue)?;
        self.receive_once(&source, max_messages, timeout).await
    }

    /// Fetch up to `max_messages` from a subscription once
    pub async fn receive_from_subscription<T: DeserializeOwned>(
        &self,
        topic: &str,
        subscription: &str,
        max_messages: u32,
        timeout: Duration,
    ) -> BusResult<Vec<T>> {
        let source = self.subscription_source(topic, subscription)?;
        self.receive_once(&source, max_messages, timeout).await
    }

    async fn receive_once<T: DeserializeOwned>(
        &self,
        source: &ReceiveSource,
        max_messages: u32,
        timeout: Duration,
    ) -> BusResult<Vec<T>> {
        let receiver = self
            .transport
            .create_receiver(source, ReceiveMode::ReceiveAndDelete)
            .await?;
        let received = receiver.receive_messages(max_messages, timeout).await;
        if let Err(e) = receiver.close().await {
            warn!(source = %source, error = %e, "Closing receiver failed");
        }

        let messages = received?;
        debug!(source = %source, count = messages.len(), "Received messages");
        Ok(messages
            .iter()
            .filter_map(|message| decode_message(source, &self.events, message))
            .collect())
    }

    /// Remove every message of a queue; returns the number removed
    pub async fn clear_queue(&self, queue: &str) -> BusResult<usize> {
        let source = self.queue_source(queue)?;
        self.clear(&source).await
    }

    /// Remove every message of a subscription; returns the number removed
    pub async fn clear_subscription(&self, topic: &str, subscription: &str) -> BusResult<usize> {
        let source = self.subscription_source(topic, subscription)?;
        self.clear(&source).await
    }

    async fn clear(&self, source: &ReceiveSource) -> BusResult<usize> {
        let receiver = self
            .transport
            .create_receiver(source, ReceiveMode::ReceiveAndDelete)
            .await?;

        let mut cleared = 0;
        let mut result = Ok(());
        for fetch in 0.. {
            if fetch == CLEAR_MAX_FETCHES {
                warn!(source = %source, cleared = cleared, "Clear stopped after the maximum number of fetches");
                break;
            }
            match receiver
                .receive_messages(CLEAR_FETCH_SIZE, CLEAR_FETCH_TIMEOUT)
                .await
            {
                Ok(messages) if messages.is_empty() => break,
                Ok(messages) => cleared += messages.len(),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = receiver.close().await {
            warn!(source = %source, error = %e, "Closing receiver failed");
        }
        result?;

        info!(source = %source, cleared = cleared, "Destination cleared");
        Ok(cleared)
    }

    fn queue_source(&self, queue: &str) -> BusResult<ReceiveSource> {
        Ok(ReceiveSource::Queue(QueueName::new(
            self.config.settings().prefixed(queue),
        )?))
    }

    fn subscription_source(&self, topic: &str, subscription: &str) -> BusResult<ReceiveSource> {
        Ok(ReceiveSource::Subscription {
            topic: TopicName::new(self.config.settings().prefixed(topic))?,
            subscription: SubscriptionName::new(subscription.to_string())?,
        })
    }

    // ========================================================================
    // Registry listings
    // ========================================================================

    /// Prefixed names of queues with a registered reader
    pub fn registered_queue_names(&self) -> Vec<String> {
        self.registry.queue_names()
    }

    /// Prefixed (topic, subscription) pairs with a registered reader
    pub fn registered_subscriptions(&self) -> Vec<(String, String)> {
        self.registry.subscriptions()
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Create a queue unless it exists
    pub async fn create_queue(&self, queue: &str) -> BusResult<()> {
        let queue = QueueName::new(self.config.settings().prefixed(queue))?;
        self.provisioner.ensure_queue(&queue).await?;
        Ok(())
    }

    /// Create a topic unless it exists
    pub async fn create_topic(&self, topic: &str) -> BusResult<()> {
        let topic = TopicName::new(self.config.settings().prefixed(topic))?;
        self.provisioner.ensure_topic(&topic).await?;
        Ok(())
    }

    /// Create a topic and one of its subscriptions unless they exist
    pub async fn create_topic_and_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> BusResult<()> {
        let source = self.subscription_source(topic, subscription)?;
        self.provisioner.ensure_source(&source).await?;
        Ok(())
    }

    /// Delete a queue; returns `false` when it did not exist
    pub async fn delete_queue(&self, queue: &str) -> BusResult<bool> {
        let queue = QueueName::new(self.config.settings().prefixed(queue))?;
        Ok(self.provisioner.admin().delete_queue(&queue).await?)
    }

    /// Delete a topic with its subscriptions; returns `false` when it did not exist
    pub async fn delete_topic(&self, topic: &str) -> BusResult<bool> {
        let topic = TopicName::new(self.config.settings().prefixed(topic))?;
        Ok(self.provisioner.admin().delete_topic(&topic).await?)
    }

    /// Delete a subscription; returns `false` when it did not exist
    pub async fn delete_subscription(&self, topic: &str, subscription: &str) -> BusResult<bool> {
        let topic = TopicName::new(self.config.settings().prefixed(topic))?;
        let subscription = SubscriptionName::new(subscription.to_string())?;
        Ok(self
            .provisioner
            .admin()
            .delete_subscription(&topic, &subscription)
            .await?)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
