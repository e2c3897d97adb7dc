//! Per-destination batch buffer.
//!
//! A buffer moves through `Open -> Flushing -> Closed` exactly once. The
//! size trigger and the deadline timer both try to claim the flush with a
//! compare-and-set on the state, so only one of them ever sends the batch.

use courier_transport::{MessageBatch, MessageSender, TransportError, WireMessage};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

const OPEN: u8 = 0;
const FLUSHING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state of a [`BatchBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting messages
    Open,
    /// Batch taken by the flush; no more appends
    Flushing,
    /// Flush finished and the buffer is discarded
    Closed,
}

impl From<u8> for BufferState {
    fn from(value: u8) -> Self {
        match value {
            OPEN => Self::Open,
            FLUSHING => Self::Flushing,
            _ => Self::Closed,
        }
    }
}

/// Accumulates messages for one destination sender
pub struct BatchBuffer {
    sender: Arc<dyn MessageSender>,
    batch: Mutex<Option<Box<dyn MessageBatch>>>,
    state: AtomicU8,
    opened_at: Instant,
}

impl BatchBuffer {
    pub fn new(sender: Arc<dyn MessageSender>, batch: Box<dyn MessageBatch>) -> Self {
        Self {
            sender,
            batch: Mutex::new(Some(batch)),
            state: AtomicU8::new(OPEN),
            opened_at: Instant::now(),
        }
    }

    pub fn sender(&self) -> &Arc<dyn MessageSender> {
        &self.sender
    }

    pub fn state(&self) -> BufferState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    fn lock_batch(&self) -> MutexGuard<'_, Option<Box<dyn MessageBatch>>> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message.
    ///
    /// `Ok(false)` means the message was not taken: either the batch is full
    /// or the buffer is no longer open.
    pub fn try_append(&self, message: &WireMessage) -> Result<bool, TransportError> {
        let mut batch = self.lock_batch();
        match batch.as_mut() {
            Some(batch) if self.state() == BufferState::Open => batch.try_add(message),
            _ => Ok(false),
        }
    }

    /// Number of messages currently held
    pub fn len(&self) -> usize {
        self.lock_batch().as_ref().map_or(0, |batch| batch.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the flush and take the batch.
    ///
    /// Only the first caller gets `Some`; every later call returns `None`.
    pub fn begin_flush(&self) -> Option<Box<dyn MessageBatch>> {
        let mut batch = self.lock_batch();
        self.state
            .compare_exchange(OPEN, FLUSHING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        batch.take()
    }

    /// Mark the buffer as discarded
    pub fn close(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }
}

impl std::fmt::Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("sender", &self.sender.identifier())
            .field("state", &self.state())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
