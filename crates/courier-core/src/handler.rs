//! Message handler contract.
//!
//! Application code implements [`MessageHandler`] for one message type.
//! At registration the engine wraps each handler in a typed adapter that
//! also satisfies [`RawMessageHandler`], so the mock strategy can invoke it
//! with an untyped payload without knowing the message type.

use crate::error::{BusError, HandlerError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a handler instance is attached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerBinding {
    /// Prefixed queue or topic name
    pub destination_name: String,
    /// Subscription name for topic readers
    pub subscription_name: Option<String>,
}

/// Application handler for messages of one type
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Type the message body is decoded into
    type Message: DeserializeOwned + Send + 'static;

    /// Called once with the handler's destination before the first message
    fn bind(&mut self, _binding: &HandlerBinding) {}

    /// Process one decoded message
    async fn process_message(
        &self,
        message: Self::Message,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Capability to process an untyped payload
#[async_trait]
pub trait RawMessageHandler: Send + Sync {
    fn binding(&self) -> &HandlerBinding;

    /// Decode `payload` into the handler's message type and process it
    async fn process_raw(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), BusError>;
}

/// Typed adapter sharing one handler instance with its receiver loop
pub(crate) struct TypedHandler<H: MessageHandler> {
    handler: Arc<H>,
    binding: HandlerBinding,
}

impl<H: MessageHandler> TypedHandler<H> {
    pub(crate) fn new(handler: Arc<H>, binding: HandlerBinding) -> Self {
        Self { handler, binding }
    }
}

#[async_trait]
impl<H: MessageHandler> RawMessageHandler for TypedHandler<H> {
    fn binding(&self) -> &HandlerBinding {
        &self.binding
    }

    async fn process_raw(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        let message = <H::Message as Deserialize>::deserialize(payload)?;
        self.handler.process_message(message, cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
