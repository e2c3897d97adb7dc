//! Outbound message requests.

use crate::error::BusError;
use courier_transport::{DestinationKind, Timestamp};
use serde::Serialize;
use std::time::Duration;

/// Optional envelope settings of an outbound message.
///
/// Every field left unset falls back to the transport default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOptions {
    pub subject: Option<String>,
    pub time_to_live: Option<Duration>,
    pub scheduled_enqueue_time: Option<Timestamp>,
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject (label)
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
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
}

/// A single outbound message addressed to a queue or a topic.
///
/// The payload is kept as a JSON value so strategies can serialize it for
/// the wire or hand it to in-process handlers without knowing its type.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRequest {
    destination_name: String,
    kind: DestinationKind,
    payload: serde_json::Value,
    options: Option<MessageOptions>,
}

impl MessageRequest {
    /// Create a request from an already encoded payload
    pub fn new(
        kind: DestinationKind,
        destination_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            destination_name: destination_name.into(),
            kind,
            payload,
            options: None,
        }
    }

    /// Create a request for a queue
    pub fn queue<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self, BusError> {
        Ok(Self::new(
            DestinationKind::Queue,
            name,
            serde_json::to_value(payload)?,
        ))
    }

    /// Create a request for a topic
    pub fn topic<T: Serialize>(name: impl Into<String>, payload: &T) -> Result<Self, BusError> {
        Ok(Self::new(
            DestinationKind::Topic,
            name,
            serde_json::to_value(payload)?,
        ))
    }

    /// Attach envelope options
    pub fn with_options(mut self, options: MessageOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn options(&self) -> Option<&MessageOptions> {
        self.options.as_ref()
    }

    /// Reason this request must not be dispatched, if any
    pub fn rejection_reason(&self) -> Option<&'static str> {
        if self.destination_name.trim().is_empty() {
            Some("blank destination name")
        } else if self.payload.is_null() {
            Some("null payload")
        } else {
            None
        }
    }

    /// Return the same request addressed to `prefix` + name
    pub(crate) fn with_prefix(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.destination_name = format!("{}{}", prefix, self.destination_name);
        }
        self
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
