//! Reader registry.
//!
//! Each registration stores a typed factory that knows how to start the
//! receiver loop for its own message type, and the raw adapter used by
//! the mock strategy. The registry is built once by the bus builder and
//! never changes afterwards.

use crate::handler::{HandlerBinding, MessageHandler, RawMessageHandler, TypedHandler};
use crate::receiver::{ReceiverHandle, ReceiverLoop, ReceiverRuntime};
use courier_transport::{DestinationKind, ReceiveSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Identity of a registration; duplicates of a key are ignored
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReaderKey {
    pub kind: DestinationKind,
    pub destination: String,
    pub subscription: Option<String>,
}

/// Starts receiver loops for one handler type
pub(crate) trait ReaderFactory: Send + Sync {
    fn spawn(
        &self,
        source: ReceiveSource,
        runtime: ReceiverRuntime,
        cancel: CancellationToken,
    ) -> ReceiverHandle;

    fn raw_handler(&self) -> Arc<dyn RawMessageHandler>;
}

pub(crate) struct TypedReader<H: MessageHandler> {
    handler: Arc<H>,
    raw: Arc<TypedHandler<H>>,
}

impl<H: MessageHandler> TypedReader<H> {
    /// Bind the handler to its destination and wrap it
    pub(crate) fn new(mut handler: H, binding: HandlerBinding) -> Self {
        handler.bind(&binding);
        let handler = Arc::new(handler);
        let raw = Arc::new(TypedHandler::new(Arc::clone(&handler), binding));
        Self { handler, raw }
    }
}

impl<H: MessageHandler> ReaderFactory for TypedReader<H> {
    fn spawn(
        &self,
        source: ReceiveSource,
        runtime: ReceiverRuntime,
        cancel: CancellationToken,
    ) -> ReceiverHandle {
        ReceiverLoop::spawn(source, Arc::clone(&self.handler), runtime, cancel)
    }

    fn raw_handler(&self) -> Arc<dyn RawMessageHandler> {
        Arc::clone(&self.raw) as Arc<dyn RawMessageHandler>
    }
}

/// One registered reader
pub struct ReaderRegistration {
    key: ReaderKey,
    source: ReceiveSource,
    factory: Arc<dyn ReaderFactory>,
    wired: AtomicBool,
}

impl ReaderRegistration {
    pub(crate) fn new(key: ReaderKey, source: ReceiveSource, factory: Arc<dyn ReaderFactory>) -> Self {
        Self {
            key,
            source,
            factory,
            wired: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ReaderKey {
        &self.key
    }

    pub fn source(&self) -> &ReceiveSource {
        &self.source
    }

    /// Check if a receiver loop was started for this registration
    pub fn is_wired(&self) -> bool {
        self.wired.load(Ordering::SeqCst)
    }

    /// Start the receiver loop unless it already runs
    pub(crate) fn wire(
        &self,
        runtime: &ReceiverRuntime,
        cancel: &CancellationToken,
    ) -> Option<ReceiverHandle> {
        if self.wired.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(
            self.factory
                .spawn(self.source.clone(), runtime.clone(), cancel.child_token()),
        )
    }

    pub(crate) fn raw_handler(&self) -> Arc<dyn RawMessageHandler> {
        self.factory.raw_handler()
    }
}

/// Immutable set of reader registrations in registration order
#[derive(Default)]
pub struct ReaderRegistry {
    registrations: Vec<ReaderRegistration>,
}

impl ReaderRegistry {
    /// Build the registry; later duplicates of a key are dropped
    pub(crate) fn new(registrations: Vec<ReaderRegistration>) -> Self {
        let mut unique: Vec<ReaderRegistration> = Vec::with_capacity(registrations.len());
        for registration in registrations {
            if !unique.iter().any(|r| r.key == registration.key) {
                unique.push(registration);
            }
        }
        Self {
            registrations: unique,
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &ReaderRegistration> {
        self.registrations.iter()
    }

    /// Names of queues with a registered reader
    pub fn queue_names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .filter(|r| r.key.kind == DestinationKind::Queue)
            .map(|r| r.key.destination.clone())
            .collect()
    }

    /// (topic, subscription) pairs with a registered reader
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.registrations
            .iter()
            .filter_map(|r| match (&r.key.kind, &r.key.subscription) {
                (DestinationKind::Topic, Some(subscription)) => {
                    Some((r.key.destination.clone(), subscription.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Handlers registered for a destination, matched case-insensitively
    pub fn handlers_for(&self, kind: DestinationKind, destination: &str) -> Vec<Arc<dyn RawMessageHandler>> {
        self.registrations
            .iter()
            .filter(|r| r.key.kind == kind && r.key.destination.eq_ignore_ascii_case(destination))
            .map(ReaderRegistration::raw_handler)
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
