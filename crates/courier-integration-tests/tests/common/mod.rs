//! Common test utilities for courier integration tests
//!
//! This module provides:
//! - Test payload types
//! - Collecting message handlers
//! - Helpers for building buses over the in-memory transport

use async_trait::async_trait;
use courier_core::courier_transport::InMemoryTransport;
use courier_core::{BusBuilder, BusSettings, HandlerBinding, HandlerError, MessageHandler};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u32,
    pub name: String,
    pub age: i32,
    pub active: bool,
    pub address: Address,
}

#[allow(dead_code)]
pub fn person(id: u32) -> Person {
    Person {
        id,
        name: format!("person-{}", id),
        age: 20 + (id % 50) as i32,
        active: id % 2 == 0,
        address: Address {
            city: "Wellington".to_string(),
            zip: format!("{:04}", id),
        },
    }
}

// ============================================================================
// Collecting handlers
// ============================================================================

/// Shared, thread-safe list of handled messages
#[derive(Clone)]
pub struct MessageCollector<T> {
    messages: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for MessageCollector<T> {
    fn default() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[allow(dead_code)]
impl<T: Clone> MessageCollector<T> {
    pub fn push(&self, message: T) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.messages.lock().unwrap().clone()
    }

    /// Wait until at least `count` messages arrived; returns the final count
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        while self.len() < count && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        self.len()
    }
}

/// Collects every person it receives, tagged with the subscription it is bound to
pub struct PersonReader {
    collector: MessageCollector<(Option<String>, Person)>,
    binding: Option<HandlerBinding>,
}

#[allow(dead_code)]
impl PersonReader {
    pub fn new(collector: &MessageCollector<(Option<String>, Person)>) -> Self {
        Self {
            collector: collector.clone(),
            binding: None,
        }
    }
}

#[async_trait]
impl MessageHandler for PersonReader {
    type Message = Person;

    fn bind(&mut self, binding: &HandlerBinding) {
        self.binding = Some(binding.clone());
    }

    async fn process_message(
        &self,
        message: Person,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let subscription = self
            .binding
            .as_ref()
            .and_then(|binding| binding.subscription_name.clone());
        self.collector.push((subscription, message));
        Ok(())
    }
}

/// Records ids and rejects any id that is not the successor of the last one
pub struct OrderedReader {
    collector: MessageCollector<u32>,
}

#[allow(dead_code)]
impl OrderedReader {
    pub fn new(collector: &MessageCollector<u32>) -> Self {
        Self {
            collector: collector.clone(),
        }
    }
}

#[async_trait]
impl MessageHandler for OrderedReader {
    type Message = Person;

    async fn process_message(
        &self,
        message: Person,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let expected = self.collector.len() as u32;
        if message.id != expected {
            return Err(HandlerError::new(format!(
                "expected id {} but received {}",
                expected, message.id
            )));
        }
        self.collector.push(message.id);
        Ok(())
    }
}

// ============================================================================
// Bus helpers
// ============================================================================

/// Settings with a short poll timeout so loops react quickly in tests
#[allow(dead_code)]
pub fn fast_settings(strategy: &str) -> BusSettings {
    BusSettings {
        send_strategy_name: strategy.to_string(),
        batch_flush_deadline_ms: 100,
        receive_message_timeout_secs: 1,
        ..BusSettings::default()
    }
}

#[allow(dead_code)]
pub fn builder(strategy: &str) -> BusBuilder {
    BusBuilder::new(fast_settings(strategy))
}

#[allow(dead_code)]
pub fn transport() -> InMemoryTransport {
    InMemoryTransport::default()
}

#[allow(dead_code)]
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
