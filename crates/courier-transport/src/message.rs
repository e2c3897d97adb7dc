//! Destination names and wire message types.

use crate::error::{TransportError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Destination Names
// ============================================================================

const MAX_ENTITY_NAME_LEN: usize = 260;
const MAX_SUBSCRIPTION_NAME_LEN: usize = 50;

/// Validate an entity name shared by queues and topics.
///
/// Names are 1-260 characters of ASCII alphanumerics, `.`, `-`, `_` and `/`,
/// and must start and end with an alphanumeric character.
fn validate_entity_name(field: &str, name: &str, max_len: usize) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > max_len {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", max_len),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, '.', '-', '_' and '/' allowed".to_string(),
        });
    }

    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_ok = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_ok || !ends_ok {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must start and end with an alphanumeric character".to_string(),
        });
    }

    Ok(())
}

/// Validated queue name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_entity_name("queue_name", &name, MAX_ENTITY_NAME_LEN)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Validated topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    /// Create new topic name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_entity_name("topic_name", &name, MAX_ENTITY_NAME_LEN)?;
        Ok(Self(name))
    }

    /// Get topic name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Validated subscription name, scoped to a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionName(String);

impl SubscriptionName {
    /// Create new subscription name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        validate_entity_name("subscription_name", &name, MAX_SUBSCRIPTION_NAME_LEN)?;
        if name.contains('/') {
            return Err(ValidationError::InvalidFormat {
                field: "subscription_name".to_string(),
                message: "'/' is not allowed".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// Get subscription name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Kind of an outbound destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    Queue,
    Topic,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Outbound destination: a queue or a topic.
///
/// Queues and topics live in disjoint namespaces, so a queue and a topic
/// with the same name are different destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Queue(QueueName),
    Topic(TopicName),
}

impl Destination {
    /// Create a queue destination from a raw name
    pub fn queue(name: &str) -> Result<Self, ValidationError> {
        Ok(Self::Queue(QueueName::new(name.to_string())?))
    }

    /// Create a topic destination from a raw name
    pub fn topic(name: &str) -> Result<Self, ValidationError> {
        Ok(Self::Topic(TopicName::new(name.to_string())?))
    }

    /// Get the entity name
    pub fn name(&self) -> &str {
        match self {
            Self::Queue(queue) => queue.as_str(),
            Self::Topic(topic) => topic.as_str(),
        }
    }

    /// Get the destination kind
    pub fn kind(&self) -> DestinationKind {
        match self {
            Self::Queue(_) => DestinationKind::Queue,
            Self::Topic(_) => DestinationKind::Topic,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.name())
    }
}

/// Inbound source: a queue or a subscription of a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReceiveSource {
    Queue(QueueName),
    Subscription {
        topic: TopicName,
        subscription: SubscriptionName,
    },
}

impl ReceiveSource {
    /// Get the entity (queue or topic) name
    pub fn entity_name(&self) -> &str {
        match self {
            Self::Queue(queue) => queue.as_str(),
            Self::Subscription { topic, .. } => topic.as_str(),
        }
    }

    /// Get the subscription name, if any
    pub fn subscription_name(&self) -> Option<&str> {
        match self {
            Self::Queue(_) => None,
            Self::Subscription { subscription, .. } => Some(subscription.as_str()),
        }
    }
}

impl std::fmt::Display for ReceiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue(queue) => write!(f, "queue:{}", queue),
            Self::Subscription {
                topic,
                subscription,
            } => write!(f, "topic:{}/{}", topic, subscription),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for messages within the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create a timestamp `delay` from now
    pub fn after(delay: Duration) -> Self {
        Self::now().saturating_add(delay)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Add a duration, saturating on overflow
    pub fn saturating_add(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Serialized message envelope handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub subject: Option<String>,
    pub time_to_live: Option<Duration>,
    pub scheduled_enqueue_time: Option<Timestamp>,
}

impl WireMessage {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
            subject: None,
            time_to_live: None,
            scheduled_enqueue_time: None,
        }
    }

    /// Set the subject (label)
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Set time-to-live for message expiration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set scheduled delivery time
    pub fn with_scheduled_enqueue_time(mut self, time: Timestamp) -> Self {
        self.scheduled_enqueue_time = Some(time);
        self
    }

    /// Approximate encoded size used against batch and message limits
    pub fn size(&self) -> usize {
        self.body.len() + self.subject.as_ref().map_or(0, |s| s.len())
    }
}

/// A message fetched from a queue or subscription.
///
/// Receivers run in receive-and-remove mode, so there is no receipt
/// handle: the message is consumed as soon as it is returned.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub subject: Option<String>,
    pub sequence_number: u64,
    pub enqueued_at: Timestamp,
}

// ============================================================================
// Batches
// ============================================================================

/// A wire batch being filled before a single batch send.
pub trait MessageBatch: Send + std::fmt::Debug {
    /// Try to add a message.
    ///
    /// Returns `Ok(false)` when the message does not fit into this batch
    /// any more; errors mean the message can never be added.
    fn try_add(&mut self, message: &WireMessage) -> Result<bool, TransportError>;

    /// Number of messages in the batch
    fn len(&self) -> usize;

    /// Check if the batch holds no message
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size of the batch content
    fn size_bytes(&self) -> usize;

    /// Consume the batch and return its messages in insertion order
    fn into_messages(self: Box<Self>) -> Vec<WireMessage>;
}

/// Size-limited batch used by the in-memory transport
#[derive(Debug, Clone)]
pub struct WireBatch {
    messages: Vec<WireMessage>,
    size_bytes: usize,
    max_messages: usize,
    max_size_bytes: usize,
}

impl WireBatch {
    /// Create an empty batch with count and size limits
    pub fn new(max_messages: usize, max_size_bytes: usize) -> Self {
        Self {
            messages: Vec::new(),
            size_bytes: 0,
            max_messages,
            max_size_bytes,
        }
    }

    /// Messages currently held by the batch
    pub fn messages(&self) -> &[WireMessage] {
        &self.messages
    }
}

impl MessageBatch for WireBatch {
    fn try_add(&mut self, message: &WireMessage) -> Result<bool, TransportError> {
        let size = message.size();
        if size > self.max_size_bytes {
            return Err(TransportError::MessageTooLarge {
                size,
                max_size: self.max_size_bytes,
            });
        }

        if self.messages.len() >= self.max_messages || self.size_bytes + size > self.max_size_bytes
        {
            return Ok(false);
        }

        self.size_bytes += size;
        self.messages.push(message.clone());
        Ok(true)
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn into_messages(self: Box<Self>) -> Vec<WireMessage> {
        self.messages
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
