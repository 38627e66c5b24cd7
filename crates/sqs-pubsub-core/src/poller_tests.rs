//! Tests for the poller.

use super::*;
use crate::cancel::{CancelToken, Canceller};
use crate::error::{CallError, Operation, TransportError};
use crate::message::QueueName;
use crate::providers::memory::{InMemoryConfig, InMemoryTransport};
use crate::retry::RetryPolicy;
use crate::transport::{QueueAttributes, QueueTransport};
use std::sync::Arc;
use tokio::time::Instant;

struct Fixture {
    transport: Arc<InMemoryTransport>,
    poller: Arc<Poller>,
    acknowledger: Acknowledger,
    queue: QueueRef,
}

async fn fixture_with(config: InMemoryConfig, cancel: CancelToken) -> Fixture {
    let transport = Arc::new(InMemoryTransport::new(config));
    let name = QueueName::new("polled".to_string()).unwrap();
    let address = transport
        .create_queue(&name, &QueueAttributes::with_retention(86_400))
        .await
        .unwrap();

    let policy =
        RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10)).without_jitter();
    let client = RetryableClient::new(transport.clone(), policy, cancel);

    Fixture {
        transport,
        poller: Arc::new(Poller::new(client.clone())),
        acknowledger: Acknowledger::new(client),
        queue: QueueRef::new(name, address),
    }
}

async fn fixture() -> Fixture {
    fixture_with(InMemoryConfig::default(), CancelToken::never()).await
}

async fn publish(fixture: &Fixture, bodies: &[&str]) -> Vec<MessageId> {
    let mut ids = Vec::new();
    for body in bodies {
        ids.push(
            fixture
                .transport
                .send_message(fixture.queue.address(), body)
                .await
                .unwrap(),
        );
    }
    ids
}

fn accept_all(_message: &InboundMessage) -> anyhow::Result<()> {
    Ok(())
}

// ============================================================================
// poll_once
// ============================================================================

mod poll_once {
    use super::*;

    #[tokio::test]
    async fn test_returns_published_messages() {
        let fixture = fixture().await;
        let ids = publish(&fixture, &["a", "b", "c"]).await;

        let messages = fixture.poller.poll_once(&fixture.queue, 10, 0).await.unwrap();

        let received: Vec<_> = messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(received, ids);
        assert_eq!(fixture.poller.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_never_deletes() {
        let fixture = fixture().await;
        publish(&fixture, &["a"]).await;

        fixture.poller.poll_once(&fixture.queue, 10, 0).await.unwrap();

        assert_eq!(fixture.transport.call_count(Operation::DeleteMessage), 0);
        assert_eq!(
            fixture.transport.queue_depth(fixture.queue.name()).unwrap().in_flight,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_returns_after_wait() {
        let fixture = fixture().await;

        let started = Instant::now();
        let messages = fixture.poller.poll_once(&fixture.queue, 10, 10).await.unwrap();

        assert!(messages.is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_batch_size_out_of_range_rejected_without_call() {
        let fixture = fixture().await;

        for requested in [0, 11, 100] {
            let err = fixture
                .poller
                .poll_once(&fixture.queue, requested, 0)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ReceiveError::BatchSizeOutOfRange { requested: r, max: 10, .. } if r == requested
            ));
        }

        assert_eq!(fixture.transport.call_count(Operation::ReceiveMessage), 0);
    }

    #[tokio::test]
    async fn test_wait_out_of_range_rejected_without_call() {
        let fixture = fixture().await;

        let err = fixture
            .poller
            .poll_once(&fixture.queue, 10, 21)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReceiveError::WaitTimeOutOfRange {
                requested: 21,
                max: 20,
                ..
            }
        ));
        assert_eq!(fixture.transport.call_count(Operation::ReceiveMessage), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_waiting_during_long_poll() {
        let fixture = fixture().await;
        let poller = fixture.poller.clone();
        let queue = fixture.queue.clone();

        let task = tokio::spawn(async move { poller.poll_once(&queue, 10, 20).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(fixture.poller.state(), PollState::Waiting);

        publish(&fixture, &["wake"]).await;
        let messages = task.await.unwrap().unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(fixture.poller.state(), PollState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_names_operation_and_queue() {
        let fixture = fixture().await;
        fixture.transport.inject_fault(
            Operation::ReceiveMessage,
            TransportError::Timeout {
                message: "first".to_string(),
            },
        );
        fixture.transport.inject_fault(
            Operation::ReceiveMessage,
            TransportError::Timeout {
                message: "second".to_string(),
            },
        );

        let err = fixture
            .poller
            .poll_once(&fixture.queue, 10, 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReceiveError::Failed {
                source: CallError::RetryExhausted { attempts: 2, .. },
                ..
            }
        ));
        let text = err.to_string();
        assert!(text.contains("ReceiveMessage"), "{}", text);
        assert!(text.contains("memory://local/polled"), "{}", text);
        assert!(text.contains("second"), "{}", text);
    }
}

// ============================================================================
// run
// ============================================================================

mod run_cycle {
    use super::*;

    #[tokio::test]
    async fn test_handles_and_acknowledges_every_message() {
        let fixture = fixture().await;
        publish(&fixture, &["a", "b", "c"]).await;
        let seen = Mutex::new(Vec::new());
        let handler = |message: &InboundMessage| -> anyhow::Result<()> {
            seen.lock().unwrap().push(message.body.clone());
            Ok(())
        };

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &handler, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(report.outcome(), PollState::Delivered);
        assert_eq!(report.received_count(), 3);
        assert_eq!(report.acknowledged_count(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);

        let depth = fixture.transport.queue_depth(fixture.queue.name()).unwrap();
        assert_eq!(depth.visible + depth.in_flight, 0);
    }

    #[tokio::test]
    async fn test_empty_cycle() {
        let fixture = fixture().await;

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &accept_all, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(report.outcome(), PollState::Empty);
        assert_eq!(report.received_count(), 0);
        assert_eq!(fixture.transport.call_count(Operation::DeleteMessage), 0);
    }

    #[tokio::test]
    async fn test_outcome_reflects_receive_not_handling() {
        let fixture = fixture().await;
        publish(&fixture, &["x"]).await;
        let reject_all =
            |_: &InboundMessage| -> anyhow::Result<()> { anyhow::bail!("rejected") };

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &reject_all, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(report.outcome(), PollState::Delivered);
        assert_eq!(report.acknowledged_count(), 0);
        assert_eq!(fixture.poller.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_handler_failure_leaves_message_unacknowledged() {
        let fixture = fixture().await;
        publish(&fixture, &["good", "bad", "good again"]).await;
        let handler = |message: &InboundMessage| -> anyhow::Result<()> {
            if message.body == "bad" {
                anyhow::bail!("cannot process '{}'", message.body);
            }
            Ok(())
        };

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &handler, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(report.acknowledged_count(), 2);
        assert_eq!(report.processing_failed_count(), 1);
        assert!(matches!(
            &report.deliveries()[1].disposition,
            Disposition::ProcessingFailed { reason } if reason.contains("cannot process")
        ));
        assert_eq!(fixture.transport.call_count(Operation::DeleteMessage), 2);
        assert_eq!(
            fixture.transport.queue_depth(fixture.queue.name()).unwrap().in_flight,
            1
        );
    }

    #[tokio::test]
    async fn test_ack_failure_does_not_stop_later_messages() {
        let fixture = fixture().await;
        publish(&fixture, &["m1", "m2", "m3"]).await;
        let fixture_transport = fixture.transport.clone();
        // Reject the delete that follows processing of m2
        let handler = move |message: &InboundMessage| -> anyhow::Result<()> {
            if message.body == "m2" {
                fixture_transport.inject_fault(
                    Operation::DeleteMessage,
                    TransportError::InvalidReceipt {
                        message: "expired".to_string(),
                    },
                );
            }
            Ok(())
        };

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &handler, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(report.received_count(), 3);
        assert_eq!(report.acknowledged_count(), 2);
        assert_eq!(report.ack_failed_count(), 1);
        assert!(matches!(
            report.deliveries()[1].disposition,
            Disposition::AckFailed { .. }
        ));
        assert!(matches!(
            report.deliveries()[2].disposition,
            Disposition::Acknowledged
        ));

        let failure = report.ack_failures().next().unwrap();
        assert_eq!(failure.message_id, report.deliveries()[1].message_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_message_is_redelivered() {
        let config = InMemoryConfig {
            default_visibility_timeout: Duration::from_secs(5),
            ..InMemoryConfig::default()
        };
        let fixture = fixture_with(config, CancelToken::never()).await;
        let ids = publish(&fixture, &["retry me"]).await;
        let reject = |_: &InboundMessage| -> anyhow::Result<()> { anyhow::bail!("not yet") };

        let first = fixture
            .poller
            .run(&fixture.queue, 10, 0, &reject, &fixture.acknowledger)
            .await
            .unwrap();
        assert_eq!(first.processing_failed_count(), 1);

        let second = fixture
            .poller
            .run(&fixture.queue, 10, 20, &accept_all, &fixture.acknowledger)
            .await
            .unwrap();

        assert_eq!(second.acknowledged_count(), 1);
        assert_eq!(second.deliveries()[0].message_id, ids[0]);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_skips_remaining_messages() {
        let canceller = Arc::new(Canceller::new());
        let fixture = fixture_with(InMemoryConfig::default(), canceller.token()).await;
        publish(&fixture, &["first", "second"]).await;
        let trigger = canceller.clone();
        let handler = move |_: &InboundMessage| -> anyhow::Result<()> {
            trigger.cancel();
            Ok(())
        };

        let report = fixture
            .poller
            .run(&fixture.queue, 10, 0, &handler, &fixture.acknowledger)
            .await
            .unwrap();

        assert!(report.was_cancelled());
        // Cancellation is observed before the first delete is attempted
        assert_eq!(report.ack_failed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert!(matches!(
            &report.deliveries()[0].disposition,
            Disposition::AckFailed { error } if error.source.is_cancelled()
        ));
    }

    #[tokio::test]
    async fn test_invalid_batch_size_fails_cycle() {
        let fixture = fixture().await;

        let err = fixture
            .poller
            .run(&fixture.queue, 0, 0, &accept_all, &fixture.acknowledger)
            .await
            .unwrap_err();

        assert!(matches!(err, ReceiveError::BatchSizeOutOfRange { .. }));
    }
}
