//! # Courier Transport
//!
//! Transport boundary of the courier dispatch engine.
//!
//! This library provides:
//! - Validated destination names (queues, topics, subscriptions)
//! - Wire message, batch and received-message types
//! - The transport, sender, receiver and administration traits a
//!   managed queue service client has to implement
//! - An in-memory transport used for tests and local development
//!
//! ## Module Organization
//!
//! - [error] - Error types for all transport operations
//! - [message] - Destination names and wire message structures
//! - [provider] - Transport configuration and entity options
//! - [client] - Transport traits
//! - [providers] - Concrete transport implementations

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{DestinationAdmin, MessageReceiver, MessageSender, ReceiveMode, Transport};
pub use error::{TransportError, ValidationError};
pub use message::{
    Destination, DestinationKind, MessageBatch, MessageId, QueueName, ReceiveSource,
    ReceivedMessage, SubscriptionName, Timestamp, TopicName, WireBatch, WireMessage,
};
pub use provider::{EntityOptions, InMemoryConfig};
pub use providers::{InMemoryTransport, TransportStats};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
