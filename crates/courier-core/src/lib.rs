//! # Courier Core
//!
//! Client-side dispatch engine of the courier message bus.
//!
//! Applications enqueue, publish and consume messages on named queues and
//! topic/subscription pairs without dealing with transport setup,
//! batching or background polling.
//!
//! ## Architecture
//!
//! - Outbound: [`ServiceBus`] resolves a [`SendStrategy`] per destination
//!   (one-by-one, bufferized or in-process mock). Strategies obtain
//!   senders from a per-destination cache that provisions destinations on
//!   first use.
//! - Inbound: one receiver loop per registered queue or subscription polls
//!   in receive-and-remove mode, decodes each body and calls the
//!   registered [`MessageHandler`].
//! - Configuration is collected by [`BusBuilder`] and frozen into a
//!   [`BusConfiguration`] when the bus is built.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_core::{BusBuilder, BusSettings, HandlerError, MessageHandler};
//! use courier_core::courier_transport::InMemoryTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl MessageHandler for Printer {
//!     type Message = String;
//!
//!     async fn process_message(
//!         &self,
//!         message: String,
//!         _cancel: &CancellationToken,
//!     ) -> Result<(), HandlerError> {
//!         println!("{}", message);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), courier_core::BusError> {
//! let transport = InMemoryTransport::default();
//! let bus = BusBuilder::new(BusSettings::default())
//!     .register_queue_reader("greetings", Printer)
//!     .build_in_memory(&transport)?;
//!
//! bus.start().await;
//! bus.send_to_queue("greetings", &"hello".to_string(), None).await?;
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod bus;
pub mod error;
pub mod events;
pub mod handler;
pub mod provisioning;
pub mod receiver;
pub mod registry;
pub mod request;
pub mod sender_cache;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use builder::{BusBuilder, BusConfiguration};
pub use bus::ServiceBus;
pub use error::{BusError, BusResult, ConfigError, HandlerError};
pub use events::DispatchEvent;
pub use handler::{HandlerBinding, MessageHandler, RawMessageHandler};
pub use receiver::ReceiverHandle;
pub use registry::ReaderKey;
pub use request::{MessageOptions, MessageRequest};
pub use settings::{AppendRetryPolicy, BusSettings};
pub use strategy::{SendOutcome, SendStrategy, StrategyStats};

pub use courier_transport;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
