//! In-memory transport implementation for testing and development.
//!
//! This module provides a fully functional in-memory transport that:
//! - Keeps queues and topics in disjoint namespaces
//! - Fans topic messages out to every subscription
//! - Honors scheduled enqueue times and message TTL
//! - Serves receive-and-remove receivers with long polling
//! - Counts wire calls and can inject send failures for tests
//!
//! This transport is intended for:
//! - Unit and integration testing of the dispatch engine
//! - Development and prototyping without a managed service
//! - Reference implementation for cloud transports

use crate::client::{DestinationAdmin, MessageReceiver, MessageSender, ReceiveMode, Transport};
use crate::error::TransportError;
use crate::message::{
    Destination, MessageBatch, MessageId, QueueName, ReceiveSource, ReceivedMessage,
    SubscriptionName, Timestamp, TopicName, WireBatch, WireMessage,
};
use crate::provider::{EntityOptions, InMemoryConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a queue or subscription with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    subject: Option<String>,
    sequence_number: u64,
    enqueued_at: Timestamp,
    available_at: Timestamp,
    expires_at: Timestamp,
}

impl StoredMessage {
    fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    fn is_available(&self, now: Timestamp) -> bool {
        now >= self.available_at
    }

    fn into_received(self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id,
            body: self.body,
            subject: self.subject,
            sequence_number: self.sequence_number,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Message store of one queue or one subscription
struct EntityQueue {
    options: EntityOptions,
    messages: VecDeque<StoredMessage>,
}

impl EntityQueue {
    fn new(options: EntityOptions) -> Self {
        Self {
            options,
            messages: VecDeque::new(),
        }
    }

    fn push(&mut self, message: &WireMessage, sequence_number: u64, now: Timestamp) {
        let available_at = message.scheduled_enqueue_time.unwrap_or(now);
        let ttl = message
            .time_to_live
            .unwrap_or(self.options.default_message_ttl);

        self.messages.push_back(StoredMessage {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            subject: message.subject.clone(),
            sequence_number,
            enqueued_at: now,
            available_at,
            expires_at: available_at.saturating_add(ttl),
        });
    }

    /// Remove and return up to `max` available messages in enqueue order
    fn take_available(&mut self, max: usize, now: Timestamp) -> Vec<StoredMessage> {
        self.messages.retain(|m| !m.is_expired(now));

        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.messages.len());
        for message in self.messages.drain(..) {
            if taken.len() < max && message.is_available(now) {
                taken.push(message);
            } else {
                remaining.push_back(message);
            }
        }
        self.messages = remaining;
        taken
    }
}

/// A topic with its subscriptions
struct TopicEntity {
    #[allow(dead_code)] // Kept for parity with the managed service entity model
    options: EntityOptions,
    subscriptions: HashMap<SubscriptionName, EntityQueue>,
}

/// All entities of the transport
#[derive(Default)]
struct TransportState {
    queues: HashMap<QueueName, EntityQueue>,
    topics: HashMap<TopicName, TopicEntity>,
    next_sequence: u64,
}

impl TransportState {
    fn enqueue(
        &mut self,
        destination: &Destination,
        messages: &[WireMessage],
    ) -> Result<Vec<MessageId>, TransportError> {
        let now = Timestamp::now();
        match destination {
            Destination::Queue(queue) => {
                let entity =
                    self.queues
                        .get_mut(queue)
                        .ok_or_else(|| TransportError::DestinationNotFound {
                            name: queue.to_string(),
                        })?;
                for message in messages {
                    self.next_sequence += 1;
                    entity.push(message, self.next_sequence, now);
                }
            }
            Destination::Topic(topic) => {
                let entity =
                    self.topics
                        .get_mut(topic)
                        .ok_or_else(|| TransportError::DestinationNotFound {
                            name: topic.to_string(),
                        })?;
                // A topic without subscriptions accepts and discards messages
                for message in messages {
                    self.next_sequence += 1;
                    for subscription in entity.subscriptions.values_mut() {
                        subscription.push(message, self.next_sequence, now);
                    }
                }
            }
        }

        Ok(messages.iter().map(|m| m.message_id.clone()).collect())
    }

    fn entity_mut(&mut self, source: &ReceiveSource) -> Result<&mut EntityQueue, TransportError> {
        match source {
            ReceiveSource::Queue(queue) => {
                self.queues
                    .get_mut(queue)
                    .ok_or_else(|| TransportError::DestinationNotFound {
                        name: queue.to_string(),
                    })
            }
            ReceiveSource::Subscription {
                topic,
                subscription,
            } => self
                .topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::DestinationNotFound {
                    name: topic.to_string(),
                })?
                .subscriptions
                .get_mut(subscription)
                .ok_or_else(|| TransportError::SubscriptionNotFound {
                    topic: topic.to_string(),
                    subscription: subscription.to_string(),
                }),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Default)]
struct StatsCounters {
    senders_created: AtomicU64,
    receivers_created: AtomicU64,
    send_calls: AtomicU64,
    batch_calls: AtomicU64,
    messages_accepted: AtomicU64,
    entities_created: AtomicU64,
}

/// Snapshot of the wire calls observed by an in-memory transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub senders_created: u64,
    pub receivers_created: u64,
    pub send_calls: u64,
    pub batch_calls: u64,
    pub messages_accepted: u64,
    pub entities_created: u64,
}

// ============================================================================
// InMemoryTransport
// ============================================================================

struct Shared {
    state: Mutex<TransportState>,
    arrivals: Notify,
    stats: StatsCounters,
    pending_failures: AtomicU32,
    config: InMemoryConfig,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one injected failure, if any is pending
    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn accept(
        &self,
        destination: &Destination,
        messages: &[WireMessage],
    ) -> Result<Vec<MessageId>, TransportError> {
        if self.take_failure() {
            return Err(TransportError::ConnectionFailed {
                message: format!("injected failure sending to {}", destination),
            });
        }

        let ids = self.lock_state().enqueue(destination, messages)?;
        self.stats
            .messages_accepted
            .fetch_add(ids.len() as u64, Ordering::Relaxed);
        self.arrivals.notify_waiters();
        Ok(ids)
    }
}

/// In-memory transport and management API
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    /// Create new in-memory transport with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TransportState::default()),
                arrivals: Notify::new(),
                stats: StatsCounters::default(),
                pending_failures: AtomicU32::new(0),
                config,
            }),
        }
    }

    /// Snapshot of the wire calls observed so far
    pub fn stats(&self) -> TransportStats {
        let stats = &self.shared.stats;
        TransportStats {
            senders_created: stats.senders_created.load(Ordering::Relaxed),
            receivers_created: stats.receivers_created.load(Ordering::Relaxed),
            send_calls: stats.send_calls.load(Ordering::Relaxed),
            batch_calls: stats.batch_calls.load(Ordering::Relaxed),
            messages_accepted: stats.messages_accepted.load(Ordering::Relaxed),
            entities_created: stats.entities_created.load(Ordering::Relaxed),
        }
    }

    /// Make the next `count` send or batch-send calls fail with a connection error
    pub fn fail_next_sends(&self, count: u32) {
        self.shared.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of messages stored for a source, including scheduled ones
    pub fn message_count(&self, source: &ReceiveSource) -> usize {
        self.shared
            .lock_state()
            .entity_mut(source)
            .map(|entity| entity.messages.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_sender(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn MessageSender>, TransportError> {
        self.shared
            .stats
            .senders_created
            .fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(InMemorySender {
            identifier: format!("{}-{}", destination.name(), uuid::Uuid::new_v4()),
            destination: destination.clone(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_receiver(
        &self,
        source: &ReceiveSource,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, TransportError> {
        if mode != ReceiveMode::ReceiveAndDelete {
            return Err(TransportError::Unsupported {
                operation: format!("{:?} receivers", mode),
            });
        }

        self.shared
            .stats
            .receivers_created
            .fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(InMemoryReceiver {
            source: source.clone(),
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl DestinationAdmin for InMemoryTransport {
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, TransportError> {
        Ok(self.shared.lock_state().queues.contains_key(queue))
    }

    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, TransportError> {
        Ok(self.shared.lock_state().topics.contains_key(topic))
    }

    async fn subscription_exists(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<bool, TransportError> {
        Ok(self
            .shared
            .lock_state()
            .topics
            .get(topic)
            .is_some_and(|t| t.subscriptions.contains_key(subscription)))
    }

    async fn create_queue(
        &self,
        queue: &QueueName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError> {
        let mut state = self.shared.lock_state();
        if state.queues.contains_key(queue) {
            return Ok(false);
        }

        state
            .queues
            .insert(queue.clone(), EntityQueue::new(options.clone()));
        self.shared
            .stats
            .entities_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(queue = %queue, "In-memory queue created");
        Ok(true)
    }

    async fn create_topic(
        &self,
        topic: &TopicName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError> {
        let mut state = self.shared.lock_state();
        if state.topics.contains_key(topic) {
            return Ok(false);
        }

        state.topics.insert(
            topic.clone(),
            TopicEntity {
                options: options.clone(),
                subscriptions: HashMap::new(),
            },
        );
        self.shared
            .stats
            .entities_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(topic = %topic, "In-memory topic created");
        Ok(true)
    }

    async fn create_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        options: &EntityOptions,
    ) -> Result<bool, TransportError> {
        let mut state = self.shared.lock_state();
        let entity =
            state
                .topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::DestinationNotFound {
                    name: topic.to_string(),
                })?;
        if entity.subscriptions.contains_key(subscription) {
            return Ok(false);
        }

        entity
            .subscriptions
            .insert(subscription.clone(), EntityQueue::new(options.clone()));
        self.shared
            .stats
            .entities_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(topic = %topic, subscription = %subscription, "In-memory subscription created");
        Ok(true)
    }

    async fn delete_queue(&self, queue: &QueueName) -> Result<bool, TransportError> {
        let removed = self.shared.lock_state().queues.remove(queue).is_some();
        self.shared.arrivals.notify_waiters();
        Ok(removed)
    }

    async fn delete_topic(&self, topic: &TopicName) -> Result<bool, TransportError> {
        let removed = self.shared.lock_state().topics.remove(topic).is_some();
        self.shared.arrivals.notify_waiters();
        Ok(removed)
    }

    async fn delete_subscription(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
    ) -> Result<bool, TransportError> {
        let removed = self
            .shared
            .lock_state()
            .topics
            .get_mut(topic)
            .is_some_and(|t| t.subscriptions.remove(subscription).is_some());
        self.shared.arrivals.notify_waiters();
        Ok(removed)
    }
}

// ============================================================================
// Sender and Receiver
// ============================================================================

struct InMemorySender {
    identifier: String,
    destination: Destination,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl InMemorySender {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                entity: format!("sender {}", self.identifier),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn send_message(&self, message: WireMessage) -> Result<MessageId, TransportError> {
        self.ensure_open()?;
        self.shared.stats.send_calls.fetch_add(1, Ordering::Relaxed);

        let max_size = self.shared.config.max_batch_size_bytes;
        if message.size() > max_size {
            return Err(TransportError::MessageTooLarge {
                size: message.size(),
                max_size,
            });
        }

        let mut ids = self
            .shared
            .accept(&self.destination, std::slice::from_ref(&message))?;
        Ok(ids.pop().unwrap_or(message.message_id))
    }

    async fn create_batch(&self) -> Result<Box<dyn MessageBatch>, TransportError> {
        self.ensure_open()?;
        Ok(Box::new(WireBatch::new(
            self.shared.config.max_batch_messages,
            self.shared.config.max_batch_size_bytes,
        )))
    }

    async fn send_batch(
        &self,
        batch: Box<dyn MessageBatch>,
    ) -> Result<Vec<MessageId>, TransportError> {
        self.ensure_open()?;
        self.shared.stats.batch_calls.fetch_add(1, Ordering::Relaxed);

        let messages = batch.into_messages();
        self.shared.accept(&self.destination, &messages)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemoryReceiver {
    source: ReceiveSource,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                entity: format!("receiver {}", self.source),
            });
        }
        Ok(())
    }

    fn take(&self, max: usize) -> Result<Vec<ReceivedMessage>, TransportError> {
        let mut state = self.shared.lock_state();
        let entity = state.entity_mut(&self.source)?;
        Ok(entity
            .take_available(max, Timestamp::now())
            .into_iter()
            .map(StoredMessage::into_received)
            .collect())
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn source(&self) -> &ReceiveSource {
        &self.source
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let max = max_messages.max(1) as usize;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.ensure_open()?;

            // Register interest before looking so an arrival in between wakes us
            let arrival = self.shared.arrivals.notified();
            let messages = self.take(max)?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            let wait = (deadline - now).min(self.shared.config.poll_interval);
            let _ = tokio::time::timeout(wait, arrival).await;
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
