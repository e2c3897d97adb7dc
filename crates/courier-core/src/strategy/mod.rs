//! # Send Strategies
//!
//! A strategy decides how one outbound [`MessageRequest`] becomes wire
//! traffic:
//!
//! - [`OneByOneStrategy`] sends every message in its own call
//! - [`BufferizedStrategy`] collects messages into per-destination batches
//!   flushed on size or age
//! - [`MockStrategy`] skips the transport and hands the payload straight
//!   to the registered handlers
//!
//! Applications may add their own implementations of [`SendStrategy`].

use crate::error::BusError;
use crate::request::MessageRequest;
use crate::sender_cache::SenderCache;
use async_trait::async_trait;
use bytes::Bytes;
use courier_transport::{Destination, WireMessage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

pub mod buffer;
pub mod bufferized;
pub mod mock;
pub mod one_by_one;

pub use buffer::{BatchBuffer, BufferState};
pub use bufferized::BufferizedStrategy;
pub use mock::MockStrategy;
pub use one_by_one::OneByOneStrategy;

pub const ONE_BY_ONE: &str = "onebyone";
pub const BUFFERIZED: &str = "bufferized";
pub const MOCK: &str = "mock";

/// Result of handing one message to a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent to the transport
    Sent,
    /// Accepted into a batch that is flushed later
    Buffered,
    /// Processed in-process by this many handlers
    Delivered { handlers: usize },
    /// Not dispatched; nothing reached the wire
    Skipped { reason: String },
    /// Dispatch failed; the failure was logged and published
    Failed { error: String },
}

/// Cumulative counters of a strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    /// Messages handed to the strategy
    pub added: u64,
    /// Messages the strategy started working on
    pub processed: u64,
    /// Messages confirmed sent or delivered
    pub sent: u64,
}

/// Thread-safe counters backing [`StrategyStats`]
#[derive(Debug, Default)]
pub struct StrategyCounters {
    added: AtomicU64,
    processed: AtomicU64,
    sent: AtomicU64,
}

impl StrategyCounters {
    pub fn record_added(&self, count: u64) {
        self.added.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StrategyStats {
        StrategyStats {
            added: self.added.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

/// Collaborators a strategy may use for one send
pub struct SendContext<'a> {
    pub senders: &'a SenderCache,
    pub cancel: &'a CancellationToken,
}

/// Policy turning outbound requests into wire sends
#[async_trait]
pub trait SendStrategy: Send + Sync {
    /// Name the strategy is selected by, matched case-insensitively
    fn name(&self) -> &str;

    /// Dispatch one request to its resolved destination.
    ///
    /// Errors are caught by the router, logged and reported as
    /// [`SendOutcome::Failed`].
    async fn try_send(
        &self,
        destination: &Destination,
        request: &MessageRequest,
        context: &SendContext<'_>,
    ) -> Result<SendOutcome, BusError>;

    fn stats(&self) -> StrategyStats;

    /// Push out anything still held back
    async fn flush(&self) {}
}

/// Serialize the payload and copy the envelope options onto a wire message
pub fn build_wire_message(request: &MessageRequest) -> Result<WireMessage, BusError> {
    let body = serde_json::to_vec(request.payload())?;
    let mut message = WireMessage::new(Bytes::from(body));

    if let Some(options) = request.options() {
        if let Some(subject) = &options.subject {
            message = message.with_subject(subject.clone());
        }
        if let Some(ttl) = options.time_to_live {
            message = message.with_ttl(ttl);
        }
        if let Some(at) = options.scheduled_enqueue_time {
            message = message.with_scheduled_enqueue_time(at);
        }
    }

    Ok(message)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
