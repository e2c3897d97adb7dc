//! Tests for the reader registry.

use super::*;
use crate::error::HandlerError;
use crate::events::EventPublisher;
use crate::provisioning::Provisioner;
use async_trait::async_trait;
use courier_transport::{EntityOptions, InMemoryTransport};
use std::time::Duration;

struct NamedHandler {
    label: &'static str,
    bound_to: Option<HandlerBinding>,
}

#[async_trait]
impl MessageHandler for NamedHandler {
    type Message = serde_json::Value;

    fn bind(&mut self, binding: &HandlerBinding) {
        self.bound_to = Some(binding.clone());
    }

    async fn process_message(
        &self,
        _message: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::new(self.label))
    }
}

fn registration(
    kind: DestinationKind,
    destination: &str,
    subscription: Option<&str>,
    label: &'static str,
) -> ReaderRegistration {
    let key = ReaderKey {
        kind,
        destination: destination.to_string(),
        subscription: subscription.map(str::to_string),
    };
    let source = match subscription {
        Some(subscription) => ReceiveSource::Subscription {
            topic: destination.parse().unwrap(),
            subscription: subscription.parse().unwrap(),
        },
        None => ReceiveSource::Queue(destination.parse().unwrap()),
    };
    let binding = HandlerBinding {
        destination_name: destination.to_string(),
        subscription_name: subscription.map(str::to_string),
    };
    let handler = NamedHandler {
        label,
        bound_to: None,
    };
    ReaderRegistration::new(key, source, Arc::new(TypedReader::new(handler, binding)))
}

fn sample_registry() -> ReaderRegistry {
    ReaderRegistry::new(vec![
        registration(DestinationKind::Queue, "orders", None, "first"),
        registration(DestinationKind::Queue, "orders", None, "second"),
        registration(DestinationKind::Topic, "people", Some("s1"), "s1"),
        registration(DestinationKind::Topic, "people", Some("s2"), "s2"),
        registration(DestinationKind::Topic, "people", Some("s1"), "dup"),
    ])
}

#[test]
fn test_duplicate_keys_keep_first_registration() {
    let registry = sample_registry();

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.queue_names(), vec!["orders".to_string()]);
    assert_eq!(
        registry.subscriptions(),
        vec![
            ("people".to_string(), "s1".to_string()),
            ("people".to_string(), "s2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_handlers_are_matched_case_insensitively() {
    let registry = sample_registry();

    let queue_handlers = registry.handlers_for(DestinationKind::Queue, "ORDERS");
    assert_eq!(queue_handlers.len(), 1);
    let error = queue_handlers[0]
        .process_raw(&serde_json::json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("first"));

    assert_eq!(registry.handlers_for(DestinationKind::Topic, "People").len(), 2);
    assert!(registry.handlers_for(DestinationKind::Topic, "orders").is_empty());
}

#[test]
fn test_handler_is_bound_before_use() {
    let binding = HandlerBinding {
        destination_name: "orders".to_string(),
        subscription_name: None,
    };
    let handler = NamedHandler {
        label: "bound",
        bound_to: None,
    };

    let reader = TypedReader::new(handler, binding.clone());

    assert_eq!(reader.handler.bound_to.as_ref(), Some(&binding));
    assert_eq!(reader.raw_handler().binding(), &binding);
}

#[tokio::test]
async fn test_registration_is_wired_once() {
    let transport = InMemoryTransport::default();
    let runtime = ReceiverRuntime {
        transport: Arc::new(transport.clone()),
        provisioner: Arc::new(Provisioner::new(
            Arc::new(transport.clone()),
            EntityOptions::default(),
        )),
        events: EventPublisher::new(),
        max_messages: 10,
        poll_timeout: Duration::from_millis(20),
    };
    let cancel = CancellationToken::new();
    let registration = registration(DestinationKind::Queue, "orders", None, "only");

    let first = registration.wire(&runtime, &cancel);
    let second = registration.wire(&runtime, &cancel);

    assert!(registration.is_wired());
    assert!(second.is_none());
    first.expect("first wiring starts a loop").stop().await;
}
