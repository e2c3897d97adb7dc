//! Startup configuration of the dispatch engine.
//!
//! [`BusBuilder`] collects reader registrations, strategy overrides and
//! custom strategies, then [`BusBuilder::build`] turns them into one
//! immutable [`BusConfiguration`] and a running [`ServiceBus`]. Nothing
//! can be registered after the bus exists.

use crate::bus::ServiceBus;
use crate::error::{BusError, BusResult};
use crate::events::EventPublisher;
use crate::handler::{HandlerBinding, MessageHandler};
use crate::registry::{ReaderFactory, ReaderKey, ReaderRegistration, ReaderRegistry, TypedReader};
use crate::settings::BusSettings;
use crate::strategy::{
    bufferized::BufferizedConfig, BufferizedStrategy, MockStrategy, OneByOneStrategy,
    SendStrategy, MOCK,
};
use courier_transport::{
    DestinationAdmin, DestinationKind, InMemoryTransport, QueueName, ReceiveSource,
    SubscriptionName, TopicName, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

type FactoryConstructor = Box<dyn FnOnce(HandlerBinding) -> Arc<dyn ReaderFactory> + Send>;

/// A registration waiting for the name prefix to be applied
struct PendingReader {
    kind: DestinationKind,
    destination: String,
    subscription: Option<String>,
    construct: FactoryConstructor,
}

/// Immutable snapshot of everything configured at startup
#[derive(Debug, Clone)]
pub struct BusConfiguration {
    settings: BusSettings,
    /// Lowercased prefixed destination name to lowercased strategy name
    overrides: HashMap<String, String>,
    readers: Vec<ReaderKey>,
}

impl BusConfiguration {
    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Strategy used for destinations without an override
    pub fn default_strategy(&self) -> String {
        self.settings.default_strategy_name().to_lowercase()
    }

    /// Strategy that handles a prefixed destination name.
    ///
    /// In mock mode every destination uses the mock strategy.
    pub fn strategy_for(&self, destination: &str) -> String {
        if self.settings.use_mock_for_unit_tests {
            return MOCK.to_string();
        }
        self.overrides
            .get(&destination.to_lowercase())
            .cloned()
            .unwrap_or_else(|| self.default_strategy())
    }

    pub fn overrides(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    /// Keys of the registered readers, prefixed, in registration order
    pub fn readers(&self) -> &[ReaderKey] {
        &self.readers
    }
}

/// Collects startup configuration of a [`ServiceBus`]
pub struct BusBuilder {
    settings: BusSettings,
    readers: Vec<PendingReader>,
    overrides: Vec<(String, String)>,
    strategies: Vec<Arc<dyn SendStrategy>>,
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new(BusSettings::default())
    }
}

impl BusBuilder {
    pub fn new(settings: BusSettings) -> Self {
        Self {
            settings,
            readers: Vec::new(),
            overrides: Vec::new(),
            strategies: Vec::new(),
        }
    }

    /// Register a handler for a queue.
    ///
    /// A second registration for the same queue is ignored.
    pub fn register_queue_reader<H: MessageHandler>(self, queue: &str, handler: H) -> Self {
        self.register(DestinationKind::Queue, queue, None, handler)
    }

    /// Register a handler for one subscription of a topic.
    ///
    /// A second registration for the same pair is ignored.
    pub fn register_topic_reader<H: MessageHandler>(
        self,
        topic: &str,
        subscription: &str,
        handler: H,
    ) -> Self {
        self.register(DestinationKind::Topic, topic, Some(subscription), handler)
    }

    fn register<H: MessageHandler>(
        mut self,
        kind: DestinationKind,
        destination: &str,
        subscription: Option<&str>,
        handler: H,
    ) -> Self {
        let duplicate = self.readers.iter().any(|r| {
            r.kind == kind
                && r.destination == destination
                && r.subscription.as_deref() == subscription
        });
        if duplicate {
            debug!(
                destination = destination,
                subscription = subscription.unwrap_or("-"),
                "Reader already registered, ignoring"
            );
            return self;
        }

        self.readers.push(PendingReader {
            kind,
            destination: destination.to_string(),
            subscription: subscription.map(str::to_string),
            construct: Box::new(move |binding| {
                Arc::new(TypedReader::new(handler, binding)) as Arc<dyn ReaderFactory>
            }),
        });
        self
    }

    /// Route one destination through a named strategy.
    ///
    /// Names are matched case-insensitively; the first override of a
    /// destination wins.
    pub fn with_destination_strategy(mut self, destination: &str, strategy: &str) -> Self {
        if self
            .overrides
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(destination))
        {
            debug!(destination = destination, "Strategy override already set, ignoring");
            return self;
        }
        self.overrides
            .push((destination.to_string(), strategy.to_lowercase()));
        self
    }

    /// Add a strategy; it replaces a built-in strategy of the same name
    pub fn with_strategy(mut self, strategy: Arc<dyn SendStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Set the strategy used for destinations without an override
    pub fn with_default_strategy(mut self, strategy: &str) -> Self {
        self.settings.send_strategy_name = strategy.to_string();
        self
    }

    /// Route every send through the in-process mock strategy
    pub fn use_mock_for_unit_tests(mut self, enabled: bool) -> Self {
        self.settings.use_mock_for_unit_tests = enabled;
        self
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Build a bus over the in-memory transport
    pub fn build_in_memory(self, transport: &InMemoryTransport) -> BusResult<ServiceBus> {
        self.build(Arc::new(transport.clone()), Arc::new(transport.clone()))
    }

    /// Validate the configuration and create the bus.
    ///
    /// Receiver loops are not started until [`ServiceBus::start`].
    pub fn build(
        self,
        transport: Arc<dyn Transport>,
        admin: Arc<dyn DestinationAdmin>,
    ) -> BusResult<ServiceBus> {
        self.settings.validate()?;

        let mut registrations = Vec::with_capacity(self.readers.len());
        for pending in self.readers {
            registrations.push(prefixed_registration(&self.settings, pending)?);
        }
        let registry = Arc::new(ReaderRegistry::new(registrations));
        let events = EventPublisher::new();

        let mut strategies: HashMap<String, Arc<dyn SendStrategy>> = HashMap::new();
        let built_in: [Arc<dyn SendStrategy>; 3] = [
            Arc::new(OneByOneStrategy::new()),
            Arc::new(BufferizedStrategy::new(
                BufferizedConfig::from(&self.settings),
                events.clone(),
            )),
            Arc::new(MockStrategy::new(Arc::clone(&registry))),
        ];
        for strategy in built_in.into_iter().chain(self.strategies) {
            strategies.insert(strategy.name().to_lowercase(), strategy);
        }

        let overrides = self
            .overrides
            .into_iter()
            .map(|(destination, strategy)| {
                (self.settings.prefixed(&destination).to_lowercase(), strategy)
            })
            .collect();

        let configuration = BusConfiguration {
            readers: registry.registrations().map(|r| r.key().clone()).collect(),
            settings: self.settings,
            overrides,
        };

        let default_strategy = configuration.default_strategy();
        if !strategies.contains_key(&default_strategy) {
            return Err(BusError::UnknownStrategy {
                name: default_strategy,
            });
        }

        info!(
            default_strategy = %default_strategy,
            readers = configuration.readers.len(),
            strategies = strategies.len(),
            "Service bus configured"
        );

        Ok(ServiceBus::new(
            Arc::new(configuration),
            transport,
            admin,
            strategies,
            registry,
            events,
        ))
    }
}

fn prefixed_registration(
    settings: &BusSettings,
    pending: PendingReader,
) -> BusResult<ReaderRegistration> {
    let destination = settings.prefixed(&pending.destination);
    let source = match &pending.subscription {
        Some(subscription) => ReceiveSource::Subscription {
            topic: TopicName::new(destination.clone())?,
            subscription: SubscriptionName::new(subscription.clone())?,
        },
        None => ReceiveSource::Queue(QueueName::new(destination.clone())?),
    };

    let binding = HandlerBinding {
        destination_name: destination.clone(),
        subscription_name: pending.subscription.clone(),
    };
    let key = ReaderKey {
        kind: pending.kind,
        destination,
        subscription: pending.subscription,
    };

    Ok(ReaderRegistration::new(
        key,
        source,
        (pending.construct)(binding),
    ))
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
