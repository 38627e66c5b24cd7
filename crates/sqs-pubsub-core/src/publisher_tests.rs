//! Tests for the publisher.

use super::*;
use crate::cancel::{CancelToken, Canceller};
use crate::error::{CallError, Operation, TransportError};
use crate::message::{QueueName, Timestamp};
use crate::providers::memory::InMemoryTransport;
use crate::retry::RetryPolicy;
use crate::transport::{QueueAttributes, QueueTransport};
use std::sync::Arc;
use tokio::time::Instant;

struct Fixture {
    transport: Arc<InMemoryTransport>,
    publisher: Publisher,
    queue: QueueRef,
}

async fn fixture(cancel: CancelToken) -> Fixture {
    let transport = Arc::new(InMemoryTransport::default());
    let name = QueueName::new("t1".to_string()).unwrap();
    let address = transport
        .create_queue(&name, &QueueAttributes::with_retention(86_400))
        .await
        .unwrap();

    let policy =
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)).without_jitter();
    let client = RetryableClient::new(transport.clone(), policy, cancel);

    Fixture {
        transport,
        publisher: Publisher::new(client),
        queue: QueueRef::new(name, address),
    }
}

fn batch(count: usize) -> Vec<OutboundMessage> {
    (0..count)
        .map(|i| OutboundMessage::new(format!("message {}", i)))
        .collect()
}

async fn drain_bodies(fixture: &Fixture) -> Vec<String> {
    let batch = fixture
        .transport
        .receive_messages(fixture.queue.address(), 10, Duration::ZERO)
        .await
        .unwrap();
    batch.into_iter().map(|m| m.body).collect()
}

#[tokio::test(start_paused = true)]
async fn test_publish_all_in_order() {
    let fixture = fixture(CancelToken::never()).await;

    let report = fixture
        .publisher
        .run(&fixture.queue, batch(3), Duration::from_secs(1))
        .await;

    assert!(report.is_complete());
    assert_eq!(report.succeeded_count(), 3);
    assert_eq!(report.failed_count(), 0);
    assert_eq!(report.message_ids().len(), 3);
    assert_eq!(
        drain_bodies(&fixture).await,
        vec!["message 0", "message 1", "message 2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pacing_only_between_sends() {
    let fixture = fixture(CancelToken::never()).await;

    let started = Instant::now();
    fixture
        .publisher
        .run(&fixture.queue, batch(5), Duration::from_secs(1))
        .await;

    // Four gaps for five messages: nothing before the first or after the last
    assert_eq!(started.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_single_message_is_not_paced() {
    let fixture = fixture(CancelToken::never()).await;

    let started = Instant::now();
    let report = fixture
        .publisher
        .run(&fixture.queue, batch(1), Duration::from_secs(10))
        .await;

    assert!(report.is_complete());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_yields_empty_report() {
    let fixture = fixture(CancelToken::never()).await;

    let report = fixture
        .publisher
        .run(&fixture.queue, Vec::new(), Duration::from_secs(1))
        .await;

    assert_eq!(report.total(), 0);
    assert!(report.is_complete());
    assert!(report.into_result().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_without_duplicates() {
    let fixture = fixture(CancelToken::never()).await;
    fixture.transport.inject_fault(
        Operation::SendMessage,
        TransportError::ServiceUnavailable {
            status: 503,
            code: "ServiceUnavailable".to_string(),
            message: "busy".to_string(),
        },
    );

    let report = fixture
        .publisher
        .run(&fixture.queue, batch(2), Duration::from_millis(10))
        .await;

    assert!(report.is_complete());
    assert_eq!(fixture.transport.call_count(Operation::SendMessage), 3);
    assert_eq!(drain_bodies(&fixture).await, vec!["message 0", "message 1"]);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_aborts_rest_of_batch() {
    let fixture = fixture(CancelToken::never()).await;
    // Every attempt of the first send is throttled
    for _ in 0..3 {
        fixture.transport.inject_fault(
            Operation::SendMessage,
            TransportError::Throttled {
                code: "RequestThrottled".to_string(),
                message: "slow down".to_string(),
            },
        );
    }

    let report = fixture
        .publisher
        .run(&fixture.queue, batch(4), Duration::from_millis(10))
        .await;

    assert_eq!(report.total(), 4);
    assert_eq!(report.succeeded_count(), 0);
    assert_eq!(report.failed_count(), 4);
    assert!(matches!(
        report.outcomes()[0],
        SendOutcome::Failed {
            error: PublishError::Send {
                index: 0,
                source: CallError::RetryExhausted { attempts: 3, .. },
                ..
            }
        }
    ));
    assert!(matches!(report.outcomes()[1], SendOutcome::NotAttempted));
    assert!(matches!(report.outcomes()[3], SendOutcome::NotAttempted));
    assert!(!report.was_cancelled());
    assert_eq!(fixture.transport.call_count(Operation::SendMessage), 3);
}

#[tokio::test]
async fn test_incomplete_report_converts_to_error() {
    let fixture = fixture(CancelToken::never()).await;
    fixture.transport.inject_fault(
        Operation::SendMessage,
        TransportError::BadRequest {
            code: "InvalidParameterValue".to_string(),
            message: "bad body".to_string(),
        },
    );

    let report = fixture
        .publisher
        .run(&fixture.queue, batch(3), Duration::ZERO)
        .await;

    assert_eq!(fixture.transport.call_count(Operation::SendMessage), 1);
    match report.into_result().unwrap_err() {
        PublishError::Incomplete {
            succeeded,
            total,
            cause,
            ..
        } => {
            assert_eq!(succeeded, 0);
            assert_eq!(total, 3);
            assert!(cause.contains("bad body"), "{}", cause);
        }
        other => panic!("expected Incomplete, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_successes_keeps_sent_ids() {
    let fixture = fixture(CancelToken::never()).await;
    let messages = vec![
        OutboundMessage::new("ok 1"),
        OutboundMessage::new("ok 2"),
        OutboundMessage::new(""),
        OutboundMessage::new("never"),
    ];

    let report = fixture
        .publisher
        .run(&fixture.queue, messages, Duration::from_millis(5))
        .await;

    assert_eq!(report.succeeded_count(), 2);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.message_ids().len(), 2);
    assert!(matches!(
        report.first_failure(),
        Some(PublishError::Send { index: 2, .. })
    ));
    assert_eq!(drain_bodies(&fixture).await, vec!["ok 1", "ok 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_pacing_stops_batch() {
    let canceller = Canceller::new();
    let fixture = fixture(canceller.token()).await;
    let publisher = fixture.publisher.clone();
    let queue = fixture.queue.clone();

    let task = tokio::spawn(async move {
        publisher
            .run(&queue, batch(5), Duration::from_secs(10))
            .await
    });

    tokio::time::sleep(Duration::from_secs(15)).await;
    canceller.cancel();

    let report = task.await.unwrap();
    assert!(report.was_cancelled());
    assert_eq!(report.succeeded_count(), 2);
    assert!(matches!(report.outcomes()[2], SendOutcome::NotAttempted));

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("cancelled"), "{}", err);
}

#[test]
fn test_greeting_messages_carry_creation_time() {
    let created_at: Timestamp = "2024-01-15T12:00:00Z".parse().unwrap();
    let message = OutboundMessage::greeting(created_at);
    assert_eq!(message.body, "Hello, world! Time is 1705320000000");
}

#[tokio::test(start_paused = true)]
async fn test_builder_runs_after_each_pacing_wait() {
    let fixture = fixture(CancelToken::never()).await;
    let started = Instant::now();
    let mut built_at = Vec::new();

    let report = fixture
        .publisher
        .run_with(&fixture.queue, 3, Duration::from_secs(1), |index| {
            built_at.push(started.elapsed());
            OutboundMessage::new(format!("built {}", index))
        })
        .await;

    assert!(report.is_complete());
    assert_eq!(
        built_at,
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(
        drain_bodies(&fixture).await,
        vec!["built 0", "built 1", "built 2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_builder_not_called_after_abort() {
    let fixture = fixture(CancelToken::never()).await;
    fixture.transport.inject_fault(
        Operation::SendMessage,
        TransportError::PermissionDenied {
            code: "AccessDenied".to_string(),
            message: "denied".to_string(),
        },
    );
    let mut builds = 0;

    let report = fixture
        .publisher
        .run_with(&fixture.queue, 4, Duration::from_millis(10), |_| {
            builds += 1;
            OutboundMessage::new("x")
        })
        .await;

    assert_eq!(builds, 1);
    assert_eq!(report.total(), 4);
    assert_eq!(report.failed_count(), 4);
    assert!(matches!(report.outcomes()[3], SendOutcome::NotAttempted));
}

#[tokio::test]
async fn test_paced_greetings_carry_distinct_send_times() {
    let fixture = fixture(CancelToken::never()).await;

    let report = fixture
        .publisher
        .run_with(&fixture.queue, 3, Duration::from_millis(50), |_| {
            OutboundMessage::greeting(Timestamp::now())
        })
        .await;
    assert!(report.is_complete());

    let bodies = drain_bodies(&fixture).await;
    let times: Vec<i64> = bodies
        .iter()
        .map(|b| {
            b.strip_prefix("Hello, world! Time is ")
                .unwrap()
                .parse()
                .unwrap()
        })
        .collect();

    assert_eq!(times.len(), 3);
    assert!(times[1] - times[0] >= 50, "{:?}", times);
    assert!(times[2] - times[1] >= 50, "{:?}", times);
}
