//! Transport configuration and entity options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options applied when a queue, topic or subscription is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOptions {
    /// Time-to-live of messages that do not carry their own
    pub default_message_ttl: Duration,
    /// Idle period after which the service may delete the entity
    pub auto_delete_on_idle: Duration,
    /// Maximum delivery attempts (queues only)
    pub max_delivery_count: u32,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            default_message_ttl: Duration::from_secs(24 * 60 * 60),
            auto_delete_on_idle: Duration::from_secs(7 * 24 * 60 * 60),
            max_delivery_count: 1,
        }
    }
}

/// In-memory transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of messages a wire batch accepts
    pub max_batch_messages: usize,
    /// Maximum encoded size of a wire batch
    pub max_batch_size_bytes: usize,
    /// Interval at which waiting receivers re-check for scheduled messages
    pub poll_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_batch_messages: 4500,
            max_batch_size_bytes: 256 * 1024, // 256KB
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
