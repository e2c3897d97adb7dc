//! Per-destination cache of outbound senders.

use crate::provisioning::Provisioner;
use courier_transport::{Destination, MessageSender, Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Lazily creates one sender per destination and hands out the same
/// handle on every later request.
///
/// The destination is provisioned only on the first request. Concurrent
/// first requests may both create a sender; the first one stored wins and
/// the duplicate is closed.
pub struct SenderCache {
    transport: Arc<dyn Transport>,
    provisioner: Arc<Provisioner>,
    senders: RwLock<HashMap<Destination, Arc<dyn MessageSender>>>,
}

impl SenderCache {
    pub fn new(transport: Arc<dyn Transport>, provisioner: Arc<Provisioner>) -> Self {
        Self {
            transport,
            provisioner,
            senders: RwLock::new(HashMap::new()),
        }
    }

    /// Get the sender of a destination, creating it on first use
    pub async fn get_sender(
        &self,
        destination: &Destination,
    ) -> Result<Arc<dyn MessageSender>, TransportError> {
        if let Some(sender) = self.cached(destination) {
            return Ok(sender);
        }

        self.provisioner.ensure_destination(destination).await?;
        let created = self.transport.create_sender(destination).await?;

        let retained = {
            let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                senders
                    .entry(destination.clone())
                    .or_insert_with(|| Arc::clone(&created)),
            )
        };

        if Arc::ptr_eq(&retained, &created) {
            debug!(destination = %destination, sender = %created.identifier(), "Sender cached");
        } else {
            debug!(destination = %destination, "Closing sender that lost the creation race");
            if let Err(e) = created.close().await {
                debug!(destination = %destination, error = %e, "Closing duplicate sender failed");
            }
        }

        Ok(retained)
    }

    fn cached(&self, destination: &Destination) -> Option<Arc<dyn MessageSender>> {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .cloned()
    }

    /// Number of cached senders
    pub fn len(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every cached sender
    pub async fn close_all(&self) {
        let senders: Vec<_> = self
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, sender)| sender)
            .collect();

        for sender in senders {
            if let Err(e) = sender.close().await {
                debug!(destination = %sender.destination(), error = %e, "Closing sender failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "sender_cache_tests.rs"]
mod tests;
