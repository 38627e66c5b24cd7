//! Bounded-wait receiving and the per-cycle handle/ack loop.
//!
//! A [`Poller`] performs exactly one receive call per [`Poller::poll_once`].
//! [`Poller::run`] adds one processing cycle on top: every received message
//! goes to a [`MessageHandler`] and, if the handler succeeds, to the
//! [`Acknowledger`]. Failures of individual messages are recorded in the
//! [`PollReport`] and never stop the cycle.

use crate::acknowledger::Acknowledger;
use crate::config::{MAX_RECEIVE_BATCH, MAX_WAIT_SECONDS};
use crate::error::{AckError, ReceiveError};
use crate::message::{InboundMessage, MessageId, QueueAddress, QueueRef};
use crate::retry::RetryableClient;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

/// Processes one received message
///
/// Returning an error leaves the message unacknowledged; the queue service
/// redelivers it once its visibility timeout elapses.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        self(message)
    }
}

/// Phase of a poll invocation: `Idle -> Waiting -> {Empty | Delivered} -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Waiting,
    Empty,
    Delivered,
}

/// Final disposition of one delivered message
#[derive(Debug)]
pub enum Disposition {
    Acknowledged,
    /// The handler failed; the message was left for redelivery
    ProcessingFailed { reason: String },
    /// Processed, but the delete failed; the message will be redelivered
    AckFailed { error: AckError },
    /// Not processed because the session was cancelled
    Skipped,
}

/// One delivered message and what happened to it
#[derive(Debug)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub disposition: Disposition,
}

/// Result of one [`Poller::run`] cycle
#[derive(Debug)]
pub struct PollReport {
    address: QueueAddress,
    outcome: PollState,
    deliveries: Vec<DeliveryRecord>,
    cancelled: bool,
}

impl PollReport {
    pub fn address(&self) -> &QueueAddress {
        &self.address
    }

    /// `Empty` or `Delivered`
    pub fn outcome(&self) -> PollState {
        self.outcome
    }

    pub fn deliveries(&self) -> &[DeliveryRecord] {
        &self.deliveries
    }

    pub fn received_count(&self) -> usize {
        self.deliveries.len()
    }

    pub fn acknowledged_count(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Acknowledged))
    }

    pub fn processing_failed_count(&self) -> usize {
        self.count(|d| matches!(d, Disposition::ProcessingFailed { .. }))
    }

    pub fn ack_failed_count(&self) -> usize {
        self.count(|d| matches!(d, Disposition::AckFailed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|d| matches!(d, Disposition::Skipped))
    }

    pub fn ack_failures(&self) -> impl Iterator<Item = &AckError> {
        self.deliveries.iter().filter_map(|record| match &record.disposition {
            Disposition::AckFailed { error } => Some(error),
            _ => None,
        })
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn count(&self, predicate: impl Fn(&Disposition) -> bool) -> usize {
        self.deliveries
            .iter()
            .filter(|record| predicate(&record.disposition))
            .count()
    }
}

/// Receives batches from one queue
#[derive(Debug)]
pub struct Poller {
    client: RetryableClient,
    state: Mutex<PollState>,
}

impl Poller {
    pub fn new(client: RetryableClient) -> Self {
        Self {
            client,
            state: Mutex::new(PollState::Idle),
        }
    }

    /// Current phase
    pub fn state(&self) -> PollState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Perform exactly one receive, waiting at most `wait_seconds`
    ///
    /// Returns an empty vector when nothing arrived in time. Never deletes.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::BatchSizeOutOfRange`] for `max_messages` of 0 or
    ///   above 10, and [`ReceiveError::WaitTimeOutOfRange`] for waits above
    ///   20 seconds; both without any network call
    /// - [`ReceiveError::Failed`] when the receive fails terminally
    pub async fn poll_once(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<InboundMessage>, ReceiveError> {
        self.receive(queue, max_messages, wait_seconds)
            .await
            .map(|(messages, _)| messages)
    }

    /// One receive call; also returns the state it resolved to
    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<(Vec<InboundMessage>, PollState), ReceiveError> {
        let address = queue.address();

        if max_messages == 0 || max_messages > MAX_RECEIVE_BATCH {
            return Err(ReceiveError::BatchSizeOutOfRange {
                address: address.clone(),
                requested: max_messages,
                max: MAX_RECEIVE_BATCH,
            });
        }
        if wait_seconds > MAX_WAIT_SECONDS {
            return Err(ReceiveError::WaitTimeOutOfRange {
                address: address.clone(),
                requested: wait_seconds,
                max: MAX_WAIT_SECONDS,
            });
        }

        self.transition(PollState::Waiting);
        let result = self
            .client
            .receive_messages(
                address,
                max_messages,
                Duration::from_secs(u64::from(wait_seconds)),
            )
            .await;

        match result {
            Ok(messages) => {
                let outcome = if messages.is_empty() {
                    PollState::Empty
                } else {
                    PollState::Delivered
                };
                self.transition(outcome);
                self.transition(PollState::Idle);
                Ok((messages, outcome))
            }
            Err(source) => {
                self.transition(PollState::Idle);
                warn!(queue = %queue.name(), error = %source, "Receive failed");
                Err(ReceiveError::Failed {
                    address: address.clone(),
                    source,
                })
            }
        }
    }

    /// Receive once, then handle and acknowledge every delivered message
    ///
    /// Messages are processed in delivery order. A handler failure leaves
    /// the message unacknowledged; an ack failure is recorded and the cycle
    /// carries on with the next message. Once cancelled, remaining messages
    /// are skipped and left for redelivery.
    pub async fn run<H>(
        &self,
        queue: &QueueRef,
        max_messages: u32,
        wait_seconds: u32,
        handler: &H,
        acknowledger: &Acknowledger,
    ) -> Result<PollReport, ReceiveError>
    where
        H: MessageHandler + ?Sized,
    {
        let (messages, outcome) = self.receive(queue, max_messages, wait_seconds).await?;

        info!(queue = %queue.name(), count = messages.len(), "Received messages");

        let cancel = self.client.cancel_token();
        let mut deliveries = Vec::with_capacity(messages.len());

        for message in messages {
            if cancel.is_cancelled() {
                deliveries.push(DeliveryRecord {
                    message_id: message.id,
                    disposition: Disposition::Skipped,
                });
                continue;
            }

            if let Err(error) = handler.handle(&message).await {
                warn!(
                    queue = %queue.name(),
                    message_id = %message.id,
                    error = %error,
                    "Handler failed, message left for redelivery"
                );
                deliveries.push(DeliveryRecord {
                    message_id: message.id,
                    disposition: Disposition::ProcessingFailed {
                        reason: format!("{:#}", error),
                    },
                });
                continue;
            }

            let InboundMessage { id, receipt, .. } = message;
            let disposition = match acknowledger.ack(queue, id.clone(), receipt).await {
                Ok(()) => Disposition::Acknowledged,
                Err(error) => Disposition::AckFailed { error },
            };
            deliveries.push(DeliveryRecord {
                message_id: id,
                disposition,
            });
        }

        let report = PollReport {
            address: queue.address().clone(),
            outcome,
            deliveries,
            cancelled: cancel.is_cancelled(),
        };

        debug!(
            queue = %queue.name(),
            received = report.received_count(),
            acknowledged = report.acknowledged_count(),
            processing_failed = report.processing_failed_count(),
            ack_failed = report.ack_failed_count(),
            skipped = report.skipped_count(),
            "Poll cycle finished"
        );

        Ok(report)
    }

    fn transition(&self, next: PollState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = *state;
        debug!(from = ?previous, to = ?next, "Poll state transition");
        *state = next;
    }
}
