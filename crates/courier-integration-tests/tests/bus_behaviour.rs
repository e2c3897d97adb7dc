//! Registration, validation and administration through the public API.

mod common;

use async_trait::async_trait;
use common::*;
use courier_core::courier_transport::Destination;
use courier_core::strategy::SendContext;
use courier_core::{
    BusError, BusSettings, DispatchEvent, HandlerError, MessageRequest, SendOutcome, SendStrategy,
    StrategyStats,
};
use std::sync::Arc;
use std::time::Duration;

/// Strategy that always fails
struct FailingStrategy;

#[async_trait]
impl SendStrategy for FailingStrategy {
    fn name(&self) -> &str {
        "failing"
    }

    async fn try_send(
        &self,
        _destination: &Destination,
        _request: &MessageRequest,
        _context: &SendContext<'_>,
    ) -> Result<SendOutcome, BusError> {
        Err(BusError::Handler(HandlerError::new("simulated failure")))
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats::default()
    }
}

#[tokio::test]
async fn test_duplicate_registration_yields_one_loop() {
    let transport = transport();
    let collector = MessageCollector::default();
    let bus = builder("onebyone")
        .register_queue_reader("q1", PersonReader::new(&collector))
        .register_queue_reader("q1", PersonReader::new(&collector))
        .register_topic_reader("t1", "s1", PersonReader::new(&collector))
        .register_topic_reader("t1", "s1", PersonReader::new(&collector))
        .build_in_memory(&transport)
        .unwrap();

    assert_eq!(bus.registered_queue_names(), vec!["q1".to_string()]);
    assert_eq!(
        bus.registered_subscriptions(),
        vec![("t1".to_string(), "s1".to_string())]
    );
    assert_eq!(bus.start().await, 2);
    assert_eq!(bus.start().await, 0);

    bus.send_to_queue("q1", &person(1), None).await.unwrap();
    assert_eq!(collector.wait_for(1, DELIVERY_TIMEOUT).await, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(collector.len(), 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_unknown_default_strategy_fails_build() {
    let result = builder("carrier-pigeon").build_in_memory(&transport());

    assert!(matches!(result, Err(BusError::UnknownStrategy { .. })));
}

#[tokio::test]
async fn test_failing_strategy_does_not_raise() {
    let transport = transport();
    let bus = builder("onebyone")
        .with_strategy(Arc::new(FailingStrategy))
        .with_destination_strategy("doomed", "failing")
        .build_in_memory(&transport)
        .unwrap();
    let mut events = bus.subscribe_events();

    let outcome = bus.send_to_queue("doomed", &person(1), None).await.unwrap();

    assert!(matches!(outcome, SendOutcome::Failed { .. }));
    assert!(matches!(
        events.try_recv().unwrap(),
        DispatchEvent::SendFailed { ref strategy, .. } if strategy == "failing"
    ));

    // Other destinations keep using the default strategy
    assert_eq!(
        bus.send_to_queue("fine", &person(2), None).await.unwrap(),
        SendOutcome::Sent
    );
}

#[tokio::test]
async fn test_null_payload_and_blank_name_are_no_ops() {
    let transport = transport();
    let bus = builder("onebyone").build_in_memory(&transport).unwrap();

    let null = bus
        .send_to_queue("q1", &serde_json::Value::Null, None)
        .await
        .unwrap();
    let blank = bus.send_to_queue("", &person(1), None).await.unwrap();

    assert!(matches!(null, SendOutcome::Skipped { .. }));
    assert!(matches!(blank, SendOutcome::Skipped { .. }));
    assert_eq!(transport.stats().send_calls, 0);
    assert_eq!(transport.stats().senders_created, 0);
}

#[tokio::test]
async fn test_prefix_applies_to_send_and_receive() {
    let transport = transport();
    let collector = MessageCollector::default();
    let settings = BusSettings {
        prefix_name: "test-".to_string(),
        ..fast_settings("onebyone")
    };
    let bus = courier_core::BusBuilder::new(settings)
        .register_queue_reader("q1", PersonReader::new(&collector))
        .build_in_memory(&transport)
        .unwrap();
    bus.start().await;

    bus.send_to_queue("q1", &person(3), None).await.unwrap();

    assert_eq!(collector.wait_for(1, DELIVERY_TIMEOUT).await, 1);
    assert_eq!(bus.registered_queue_names(), vec!["test-q1".to_string()]);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_receive_and_clear() {
    let transport = transport();
    let bus = builder("onebyone").build_in_memory(&transport).unwrap();

    for id in 0..5 {
        bus.send_to_queue("inbox", &person(id), None).await.unwrap();
    }

    let first: Vec<Person> = bus
        .receive("inbox", 2, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(first, vec![person(0), person(1)]);

    assert_eq!(bus.clear_queue("inbox").await.unwrap(), 3);
    let rest: Vec<Person> = bus
        .receive("inbox", 10, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_clear_subscription_leaves_others() {
    let transport = transport();
    let bus = builder("onebyone").build_in_memory(&transport).unwrap();
    bus.create_topic_and_subscription("news", "keep").await.unwrap();
    bus.create_topic_and_subscription("news", "drop").await.unwrap();

    for id in 0..3 {
        bus.publish_to_topic("news", &person(id), None).await.unwrap();
    }

    assert_eq!(bus.clear_subscription("news", "drop").await.unwrap(), 3);
    let kept: Vec<Person> = bus
        .receive_from_subscription("news", "keep", 10, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(kept.len(), 3);
}
