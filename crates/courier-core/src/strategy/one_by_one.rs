//! Strategy sending each message in its own wire call.

use super::{
    build_wire_message, SendContext, SendOutcome, SendStrategy, StrategyCounters, StrategyStats,
    ONE_BY_ONE,
};
use crate::error::BusError;
use crate::request::MessageRequest;
use async_trait::async_trait;
use courier_transport::Destination;
use tracing::trace;

/// Sends every message immediately and waits for the transport.
///
/// Sequential calls from one caller reach the wire in call order.
#[derive(Debug, Default)]
pub struct OneByOneStrategy {
    counters: StrategyCounters,
}

impl OneByOneStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SendStrategy for OneByOneStrategy {
    fn name(&self) -> &str {
        ONE_BY_ONE
    }

    async fn try_send(
        &self,
        destination: &Destination,
        request: &MessageRequest,
        context: &SendContext<'_>,
    ) -> Result<SendOutcome, BusError> {
        let sender = context.senders.get_sender(destination).await?;
        let message = build_wire_message(request)?;
        self.counters.record_added(1);
        self.counters.record_processed(1);

        let message_id = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => {
                return Ok(SendOutcome::Skipped {
                    reason: "send cancelled".to_string(),
                });
            }
            result = sender.send_message(message) => result?,
        };

        self.counters.record_sent(1);
        trace!(destination = %destination, message_id = %message_id, "Message sent");
        Ok(SendOutcome::Sent)
    }

    fn stats(&self) -> StrategyStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
#[path = "one_by_one_tests.rs"]
mod tests;
