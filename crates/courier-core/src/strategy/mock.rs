//! In-process strategy handing payloads straight to registered handlers.

use super::{SendContext, SendOutcome, SendStrategy, StrategyCounters, StrategyStats, MOCK};
use crate::error::BusError;
use crate::registry::ReaderRegistry;
use crate::request::MessageRequest;
use async_trait::async_trait;
use courier_transport::{Destination, DestinationKind};
use std::sync::Arc;
use tracing::{trace, warn};

/// Delivers synchronously, without the transport.
///
/// A queue message goes to the queue's handler; a topic message goes to
/// the handler of every subscription, one after the other. When the send
/// call returns the handlers have finished.
pub struct MockStrategy {
    registry: Arc<ReaderRegistry>,
    counters: StrategyCounters,
}

impl MockStrategy {
    pub(crate) fn new(registry: Arc<ReaderRegistry>) -> Self {
        Self {
            registry,
            counters: StrategyCounters::default(),
        }
    }
}

#[async_trait]
impl SendStrategy for MockStrategy {
    fn name(&self) -> &str {
        MOCK
    }

    async fn try_send(
        &self,
        destination: &Destination,
        request: &MessageRequest,
        context: &SendContext<'_>,
    ) -> Result<SendOutcome, BusError> {
        let mut handlers = self
            .registry
            .handlers_for(destination.kind(), destination.name());
        if destination.kind() == DestinationKind::Queue {
            handlers.truncate(1);
        }

        if handlers.is_empty() {
            warn!(destination = %destination, "No handler registered, message not delivered");
            return Ok(SendOutcome::Skipped {
                reason: "no handler registered".to_string(),
            });
        }

        for handler in &handlers {
            self.counters.record_added(1);
            self.counters.record_processed(1);
            handler.process_raw(request.payload(), context.cancel).await?;
            self.counters.record_sent(1);
            trace!(
                destination = %destination,
                subscription = handler.binding().subscription_name.as_deref().unwrap_or("-"),
                "Message delivered in process"
            );
        }

        Ok(SendOutcome::Delivered {
            handlers: handlers.len(),
        })
    }

    fn stats(&self) -> StrategyStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
