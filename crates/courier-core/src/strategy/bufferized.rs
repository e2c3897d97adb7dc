//! Strategy batching messages per destination.
//!
//! Producers only enqueue a pending send and return. Whoever takes the
//! single-slot gate drains the shared FIFO queue: every pending send is
//! appended to the batch buffer of its destination, and a buffer that
//! reaches the capacity is flushed inline. A deadline timer armed when a
//! buffer opens flushes it if the size trigger never fires.

use super::buffer::{BatchBuffer, BufferState};
use super::{
    build_wire_message, SendContext, SendOutcome, SendStrategy, StrategyCounters, StrategyStats,
    BUFFERIZED,
};
use crate::error::BusError;
use crate::events::{DispatchEvent, EventPublisher};
use crate::request::MessageRequest;
use crate::settings::{AppendRetryPolicy, BusSettings};
use async_trait::async_trait;
use courier_transport::{Destination, MessageSender, TransportError, WireMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, trace, warn};

/// Tuning of the bufferized strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferizedConfig {
    /// Messages per destination batch before a size-triggered flush
    pub capacity: usize,
    /// Age at which an open batch is flushed
    pub flush_deadline: Duration,
    /// Upper bound on one batch send
    pub send_timeout: Duration,
    pub append_retry: AppendRetryPolicy,
}

impl From<&BusSettings> for BufferizedConfig {
    fn from(settings: &BusSettings) -> Self {
        Self {
            capacity: settings.batch_sending_buffer_size,
            flush_deadline: settings.batch_flush_deadline(),
            send_timeout: settings.batch_send_timeout(),
            append_retry: settings.append_retry.clone(),
        }
    }
}

impl Default for BufferizedConfig {
    fn default() -> Self {
        Self::from(&BusSettings::default())
    }
}

/// A message waiting for the drain
struct PendingSend {
    sender: Arc<dyn MessageSender>,
    message: WireMessage,
}

struct Inner {
    config: BufferizedConfig,
    /// Live buffers keyed by sender identifier
    buffers: Mutex<HashMap<String, Arc<BatchBuffer>>>,
    pending: Mutex<VecDeque<PendingSend>>,
    gate: Semaphore,
    counters: StrategyCounters,
    events: EventPublisher,
}

/// Batches messages per destination, flushed on size or deadline
pub struct BufferizedStrategy {
    inner: Arc<Inner>,
}

impl BufferizedStrategy {
    pub(crate) fn new(config: BufferizedConfig, events: EventPublisher) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                buffers: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                gate: Semaphore::new(1),
                counters: StrategyCounters::default(),
                events,
            }),
        }
    }

    /// Number of open buffers
    pub fn open_buffers(&self) -> usize {
        self.inner.lock_buffers().len()
    }
}

#[async_trait]
impl SendStrategy for BufferizedStrategy {
    fn name(&self) -> &str {
        BUFFERIZED
    }

    async fn try_send(
        &self,
        destination: &Destination,
        request: &MessageRequest,
        context: &SendContext<'_>,
    ) -> Result<SendOutcome, BusError> {
        if context.cancel.is_cancelled() {
            return Ok(SendOutcome::Skipped {
                reason: "send cancelled".to_string(),
            });
        }

        let sender = context.senders.get_sender(destination).await?;
        let message = build_wire_message(request)?;
        self.inner.counters.record_added(1);
        self.inner.lock_pending().push_back(PendingSend { sender, message });
        trace!(destination = %destination, "Message queued for batching");

        self.inner.drain().await;
        Ok(SendOutcome::Buffered)
    }

    fn stats(&self) -> StrategyStats {
        self.inner.counters.snapshot()
    }

    async fn flush(&self) {
        self.inner.drain().await;
        let buffers: Vec<_> = self.inner.lock_buffers().values().cloned().collect();
        for buffer in buffers {
            self.inner.flush(&buffer).await;
        }
    }
}

impl Inner {
    fn lock_buffers(&self) -> MutexGuard<'_, HashMap<String, Arc<BatchBuffer>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<PendingSend>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_pending(&self) -> Option<PendingSend> {
        self.lock_pending().pop_front()
    }

    /// Process queued sends unless another caller is already doing it
    async fn drain(self: &Arc<Self>) {
        loop {
            let Ok(permit) = self.gate.try_acquire() else {
                return;
            };

            while let Some(pending) = self.pop_pending() {
                self.counters.record_processed(1);
                if let Some(buffer) = self.append(pending).await {
                    if buffer.len() >= self.config.capacity {
                        trace!(
                            destination = %buffer.sender().destination(),
                            "Batch capacity reached"
                        );
                        self.flush(&buffer).await;
                    }
                }
            }

            drop(permit);

            // A producer may have enqueued after the last pop but before the
            // permit was released, and found the gate still held.
            if self.lock_pending().is_empty() {
                return;
            }
        }
    }

    /// Append one message to its destination buffer, retrying transient
    /// failures. Returns the buffer holding the message, or `None` when
    /// the message was dropped.
    async fn append(self: &Arc<Self>, pending: PendingSend) -> Option<Arc<BatchBuffer>> {
        let PendingSend { sender, message } = pending;
        let retry = &self.config.append_retry;
        let mut attempt = 0;

        loop {
            let result = match self.buffer_for(&sender).await {
                Ok(buffer) => buffer.try_append(&message).map(|added| (buffer, added)),
                Err(e) => Err(e),
            };

            match result {
                Ok((buffer, true)) => return Some(buffer),
                // Flushed by the deadline timer meanwhile; the next pass opens a new buffer
                Ok((buffer, false)) if buffer.state() != BufferState::Open => continue,
                Ok((buffer, false)) if !buffer.is_empty() => {
                    self.flush(&buffer).await;
                }
                Ok((_, false)) => {
                    self.drop_message(&sender, "message does not fit into an empty batch");
                    return None;
                }
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    attempt += 1;
                    warn!(
                        destination = %sender.destination(),
                        attempt,
                        error = %e,
                        "Appending message to batch failed, retrying"
                    );
                    tokio::time::sleep(retry.delay()).await;
                }
                Err(e) => {
                    error!(
                        destination = %sender.destination(),
                        attempts = attempt + 1,
                        error = %e,
                        "Appending message to batch failed, dropping message"
                    );
                    self.drop_message(&sender, &e.to_string());
                    return None;
                }
            }
        }
    }

    /// Open buffer of a sender, creating one when none is open
    async fn buffer_for(
        self: &Arc<Self>,
        sender: &Arc<dyn MessageSender>,
    ) -> Result<Arc<BatchBuffer>, TransportError> {
        if let Some(buffer) = self.lock_buffers().get(sender.identifier()) {
            if buffer.state() == BufferState::Open {
                return Ok(Arc::clone(buffer));
            }
        }

        let batch = sender.create_batch().await?;
        let buffer = Arc::new(BatchBuffer::new(Arc::clone(sender), batch));
        self.lock_buffers()
            .insert(sender.identifier().to_string(), Arc::clone(&buffer));
        self.arm_deadline(&buffer);
        debug!(destination = %sender.destination(), "Batch buffer opened");
        Ok(buffer)
    }

    fn arm_deadline(self: &Arc<Self>, buffer: &Arc<BatchBuffer>) {
        let inner = Arc::clone(self);
        let buffer = Arc::clone(buffer);
        let deadline = self.config.flush_deadline;

        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if buffer.state() == BufferState::Open {
                trace!(destination = %buffer.sender().destination(), "Batch deadline elapsed");
                inner.flush(&buffer).await;
            }
        });
    }

    /// Send the batch of a buffer and discard the buffer.
    ///
    /// Does nothing if another trigger already claimed the flush.
    async fn flush(&self, buffer: &Arc<BatchBuffer>) {
        let Some(batch) = buffer.begin_flush() else {
            return;
        };

        let destination = buffer.sender().destination().name().to_string();
        let count = batch.len();

        if count > 0 {
            let timeout = self.config.send_timeout;
            match tokio::time::timeout(timeout, buffer.sender().send_batch(batch)).await {
                Ok(Ok(_)) => {
                    self.counters.record_sent(count as u64);
                    debug!(destination = %destination, count, "Batch sent");
                    self.events.publish(DispatchEvent::BatchSent { destination, count });
                }
                Ok(Err(e)) => {
                    error!(destination = %destination, count, error = %e, "Batch send failed");
                    self.events.publish(DispatchEvent::BatchSendFailed {
                        destination,
                        count,
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    error!(
                        destination = %destination,
                        count,
                        timeout_secs = timeout.as_secs(),
                        "Batch send timed out"
                    );
                    self.events.publish(DispatchEvent::BatchSendFailed {
                        destination,
                        count,
                        error: format!("batch send timed out after {:?}", timeout),
                    });
                }
            }
        }

        let mut buffers = self.lock_buffers();
        let identifier = buffer.sender().identifier();
        if buffers
            .get(identifier)
            .is_some_and(|current| Arc::ptr_eq(current, buffer))
        {
            buffers.remove(identifier);
        }
        buffer.close();
    }

    fn drop_message(&self, sender: &Arc<dyn MessageSender>, reason: &str) {
        warn!(destination = %sender.destination(), reason, "Message dropped from batch");
        self.events.publish(DispatchEvent::MessageDropped {
            destination: sender.destination().name().to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "bufferized_tests.rs"]
mod tests;
