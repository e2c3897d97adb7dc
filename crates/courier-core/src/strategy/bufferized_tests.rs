//! Tests for the bufferized strategy.

use super::*;
use crate::provisioning::Provisioner;
use crate::sender_cache::SenderCache;
use courier_transport::{
    DestinationKind, EntityOptions, InMemoryConfig, InMemoryTransport, MessageBatch, MessageId,
    MessageReceiver, ReceiveMode, ReceiveSource, Transport, WireBatch,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Harness
// ============================================================================

struct Harness {
    transport: InMemoryTransport,
    senders: SenderCache,
    cancel: CancellationToken,
    strategy: BufferizedStrategy,
    events: broadcast::Receiver<DispatchEvent>,
}

impl Harness {
    fn new(capacity: usize) -> Self {
        Self::with_transport(capacity, InMemoryConfig::default())
    }

    fn with_transport(capacity: usize, transport_config: InMemoryConfig) -> Self {
        let transport = InMemoryTransport::new(transport_config);
        let provisioner = Arc::new(Provisioner::new(
            Arc::new(transport.clone()),
            EntityOptions::default(),
        ));
        let senders = SenderCache::new(Arc::new(transport.clone()), provisioner);
        let publisher = EventPublisher::new();
        let events = publisher.subscribe();
        let config = BufferizedConfig {
            capacity,
            ..BufferizedConfig::default()
        };

        Self {
            transport,
            senders,
            cancel: CancellationToken::new(),
            strategy: BufferizedStrategy::new(config, publisher),
            events,
        }
    }

    async fn send(&self, queue: &str, payload: serde_json::Value) -> SendOutcome {
        let context = SendContext {
            senders: &self.senders,
            cancel: &self.cancel,
        };
        let request = MessageRequest::new(DestinationKind::Queue, queue, payload);
        self.strategy
            .try_send(&Destination::queue(queue).unwrap(), &request, &context)
            .await
            .unwrap()
    }

    async fn received(&self, queue: &str) -> Vec<serde_json::Value> {
        let receiver = self
            .transport
            .create_receiver(
                &ReceiveSource::Queue(queue.parse().unwrap()),
                ReceiveMode::ReceiveAndDelete,
            )
            .await
            .unwrap();
        receiver
            .receive_messages(10_000, Duration::from_millis(10))
            .await
            .unwrap()
            .into_iter()
            .map(|m| serde_json::from_slice(&m.body).unwrap())
            .collect()
    }

    fn drained_events(&mut self) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Sleep well past the flush deadline so pending timers fire
async fn past_deadline() {
    tokio::time::sleep(BufferizedConfig::default().flush_deadline * 2).await;
}

// ============================================================================
// Flush Trigger Tests
// ============================================================================

mod flush_triggers {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_uses_ceil_n_over_c_batches() {
        let harness = Harness::new(20);

        for i in 0..45 {
            assert_eq!(harness.send("q1", json!(i)).await, SendOutcome::Buffered);
        }
        assert_eq!(harness.transport.stats().batch_calls, 2);

        past_deadline().await;

        assert_eq!(harness.transport.stats().batch_calls, 3);
        assert_eq!(harness.transport.stats().send_calls, 0);
        let expected: Vec<_> = (0..45).map(|i| json!(i)).collect();
        assert_eq!(harness.received("q1").await, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sparse_bursts_use_one_batch_each() {
        let harness = Harness::new(20);

        for i in 0..3 {
            harness.send("q1", json!(i)).await;
        }
        past_deadline().await;
        for i in 3..6 {
            harness.send("q1", json!(i)).await;
        }
        past_deadline().await;

        assert_eq!(harness.transport.stats().batch_calls, 2);
        assert_eq!(harness.received("q1").await.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_sent_before_deadline() {
        let harness = Harness::new(20);

        harness.send("q1", json!("early")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.transport.stats().batch_calls, 0);
        assert_eq!(harness.strategy.open_buffers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destinations_are_batched_separately() {
        let harness = Harness::new(2);

        harness.send("a", json!(1)).await;
        harness.send("b", json!(2)).await;
        harness.send("a", json!(3)).await;

        assert_eq!(harness.transport.stats().batch_calls, 1);
        assert_eq!(harness.received("a").await, vec![json!(1), json!(3)]);
        assert_eq!(harness.strategy.open_buffers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush_sends_partial_batches() {
        let harness = Harness::new(20);

        harness.send("q1", json!(1)).await;
        harness.strategy.flush().await;

        assert_eq!(harness.transport.stats().batch_calls, 1);
        assert_eq!(harness.strategy.open_buffers(), 0);

        // The deadline timer of the flushed buffer must not send again
        past_deadline().await;
        assert_eq!(harness.transport.stats().batch_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_wire_batch_is_flushed_and_message_kept() {
        let harness = Harness::with_transport(
            10,
            InMemoryConfig {
                max_batch_messages: 3,
                ..InMemoryConfig::default()
            },
        );

        for i in 0..7 {
            harness.send("q1", json!(i)).await;
        }
        assert_eq!(harness.transport.stats().batch_calls, 2);

        past_deadline().await;

        assert_eq!(harness.transport.stats().batch_calls, 3);
        assert_eq!(harness.received("q1").await.len(), 7);
    }
}

// ============================================================================
// Counter and Event Tests
// ============================================================================

mod reporting {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counters_and_batch_events() {
        let mut harness = Harness::new(2);

        for i in 0..4 {
            harness.send("q1", json!(i)).await;
        }

        assert_eq!(
            harness.strategy.stats(),
            StrategyStats {
                added: 4,
                processed: 4,
                sent: 4
            }
        );
        assert_eq!(
            harness.drained_events(),
            vec![
                DispatchEvent::BatchSent {
                    destination: "q1".to_string(),
                    count: 2
                },
                DispatchEvent::BatchSent {
                    destination: "q1".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_reported_and_not_counted() {
        let mut harness = Harness::new(2);
        harness.transport.fail_next_sends(1);

        harness.send("q1", json!(1)).await;
        harness.send("q1", json!(2)).await;

        assert_eq!(harness.strategy.stats().sent, 0);
        assert!(matches!(
            harness.drained_events().as_slice(),
            [DispatchEvent::BatchSendFailed { count: 2, .. }]
        ));
        assert!(harness.received("q1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_message_is_dropped() {
        let mut harness = Harness::with_transport(
            10,
            InMemoryConfig {
                max_batch_size_bytes: 16,
                ..InMemoryConfig::default()
            },
        );

        harness
            .send("q1", json!("a payload far longer than sixteen bytes"))
            .await;

        assert!(matches!(
            harness.drained_events().as_slice(),
            [DispatchEvent::MessageDropped { .. }]
        ));
        assert_eq!(harness.strategy.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_send_is_skipped() {
        let harness = Harness::new(10);
        harness.cancel.cancel();

        let outcome = harness.send("q1", json!(1)).await;

        assert!(matches!(outcome, SendOutcome::Skipped { .. }));
        assert_eq!(harness.strategy.stats().added, 0);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        let harness = Arc::new(Harness::new(10));

        let mut tasks = Vec::new();
        for producer in 0..5 {
            let harness = Arc::clone(&harness);
            tasks.push(tokio::spawn(async move {
                for i in 0..20 {
                    harness.send("q1", json!(producer * 100 + i)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        harness.strategy.flush().await;

        assert_eq!(harness.received("q1").await.len(), 100);
        assert_eq!(harness.strategy.stats().sent, 100);
    }
}

// ============================================================================
// Append Retry Tests
// ============================================================================

mod append_retry {
    use super::*;
    use courier_transport::{QueueName, TransportError};

    /// Sender whose batch creation fails a number of times
    struct FlakySender {
        destination: Destination,
        failures_left: AtomicU32,
        sent: std::sync::Mutex<Vec<WireMessage>>,
    }

    impl FlakySender {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                destination: Destination::Queue(QueueName::new("flaky".to_string()).unwrap()),
                failures_left: AtomicU32::new(failures),
                sent: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        fn identifier(&self) -> &str {
            "flaky-sender"
        }

        fn destination(&self) -> &Destination {
            &self.destination
        }

        async fn send_message(&self, message: WireMessage) -> Result<MessageId, TransportError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(message.message_id)
        }

        async fn create_batch(&self) -> Result<Box<dyn MessageBatch>, TransportError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::ConnectionFailed {
                    message: "flaky".to_string(),
                });
            }
            Ok(Box::new(WireBatch::new(100, 1024 * 1024)))
        }

        async fn send_batch(
            &self,
            batch: Box<dyn MessageBatch>,
        ) -> Result<Vec<MessageId>, TransportError> {
            let messages = batch.into_messages();
            let ids = messages.iter().map(|m| m.message_id.clone()).collect();
            self.sent.lock().unwrap().extend(messages);
            Ok(ids)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn enqueue(strategy: &BufferizedStrategy, sender: &Arc<FlakySender>) {
        strategy.inner.lock_pending().push_back(PendingSend {
            sender: Arc::clone(sender) as Arc<dyn MessageSender>,
            message: WireMessage::new(bytes::Bytes::from_static(b"1")),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let strategy = BufferizedStrategy::new(BufferizedConfig::default(), EventPublisher::new());
        let sender = FlakySender::new(2);

        enqueue(&strategy, &sender);
        strategy.inner.drain().await;
        strategy.flush().await;

        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_drop_the_message() {
        let publisher = EventPublisher::new();
        let mut events = publisher.subscribe();
        let strategy = BufferizedStrategy::new(BufferizedConfig::default(), publisher);
        let sender = FlakySender::new(10);

        enqueue(&strategy, &sender);
        strategy.inner.drain().await;
        strategy.flush().await;

        assert!(sender.sent.lock().unwrap().is_empty());
        // One attempt plus the configured retries
        assert_eq!(sender.failures_left.load(Ordering::SeqCst), 6);
        assert!(matches!(
            events.try_recv(),
            Ok(DispatchEvent::MessageDropped { destination, .. }) if destination == "flaky"
        ));
    }
}
