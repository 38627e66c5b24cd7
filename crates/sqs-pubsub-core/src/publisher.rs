//! Paced, ordered publishing of a message batch.

use crate::error::PublishError;
use crate::message::{MessageId, OutboundMessage, QueueAddress, QueueRef};
use crate::retry::RetryableClient;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// What happened to one message of a batch
#[derive(Debug)]
pub enum SendOutcome {
    Sent { message_id: MessageId },
    Failed { error: PublishError },
    /// The batch was aborted before this message was sent
    NotAttempted,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Per-message result of [`Publisher::run`]
///
/// Outcomes are in batch order. Messages that were never attempted count as
/// failed, so `succeeded_count() + failed_count() == total()`.
#[derive(Debug)]
pub struct PublishReport {
    address: QueueAddress,
    outcomes: Vec<SendOutcome>,
    cancelled: bool,
}

impl PublishReport {
    pub fn address(&self) -> &QueueAddress {
        &self.address
    }

    pub fn outcomes(&self) -> &[SendOutcome] {
        &self.outcomes
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_sent()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.succeeded_count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }

    /// Whether the batch was cut short by cancellation
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Ids of the messages confirmed sent, in batch order
    pub fn message_ids(&self) -> Vec<&MessageId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                SendOutcome::Sent { message_id } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    /// First per-message failure, if any
    pub fn first_failure(&self) -> Option<&PublishError> {
        self.outcomes.iter().find_map(|o| match o {
            SendOutcome::Failed { error } => Some(error),
            _ => None,
        })
    }

    /// Convert into the sent ids, or [`PublishError::Incomplete`] if any
    /// message was not sent
    pub fn into_result(self) -> Result<Vec<MessageId>, PublishError> {
        if !self.is_complete() {
            let cause = match self.first_failure() {
                Some(error) => error.to_string(),
                None if self.cancelled => "cancelled".to_string(),
                None => "unknown".to_string(),
            };
            return Err(PublishError::Incomplete {
                succeeded: self.succeeded_count(),
                total: self.total(),
                address: self.address,
                cause,
            });
        }

        Ok(self
            .outcomes
            .into_iter()
            .filter_map(|o| match o {
                SendOutcome::Sent { message_id } => Some(message_id),
                _ => None,
            })
            .collect())
    }
}

/// Sends batches in order with a fixed pause between sends
#[derive(Debug, Clone)]
pub struct Publisher {
    client: RetryableClient,
}

impl Publisher {
    pub fn new(client: RetryableClient) -> Self {
        Self { client }
    }

    /// Send `messages` in order, waiting `pacing` between consecutive sends
    ///
    /// Each send goes through the retry policy. The first terminal failure,
    /// or a cancellation, aborts the rest of the batch; messages already
    /// sent are never re-sent.
    pub async fn run(
        &self,
        queue: &QueueRef,
        messages: Vec<OutboundMessage>,
        pacing: Duration,
    ) -> PublishReport {
        let total = messages.len();
        self.send_paced(queue, total, messages.into_iter(), pacing)
            .await
    }

    /// Send `count` messages built by `build(index)`, paced like [`Publisher::run`]
    ///
    /// Each message is built right before its own send, after the pacing
    /// wait, so time-stamped bodies reflect when they actually went out.
    pub async fn run_with<F>(
        &self,
        queue: &QueueRef,
        count: usize,
        pacing: Duration,
        build: F,
    ) -> PublishReport
    where
        F: FnMut(usize) -> OutboundMessage,
    {
        self.send_paced(queue, count, (0..count).map(build), pacing)
            .await
    }

    async fn send_paced<I>(
        &self,
        queue: &QueueRef,
        total: usize,
        mut messages: I,
        pacing: Duration,
    ) -> PublishReport
    where
        I: Iterator<Item = OutboundMessage>,
    {
        let address = queue.address().clone();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;

        for index in 0..total {
            if index > 0 && self.client.cancel_token().sleep(pacing).await.is_err() {
                cancelled = true;
                break;
            }

            // Pulled lazily so a builder runs after the pacing wait
            let Some(message) = messages.next() else {
                break;
            };

            match self.client.send_message(&address, &message.body).await {
                Ok(message_id) => {
                    info!(
                        queue = %queue.name(),
                        index = index,
                        message_id = %message_id,
                        "Message sent"
                    );
                    outcomes.push(SendOutcome::Sent { message_id });
                }
                Err(source) => {
                    cancelled = source.is_cancelled();
                    let error = PublishError::Send {
                        address: address.clone(),
                        index,
                        source,
                    };
                    warn!(
                        queue = %queue.name(),
                        index = index,
                        error = %error,
                        "Publishing aborted"
                    );
                    outcomes.push(SendOutcome::Failed { error });
                    break;
                }
            }
        }

        outcomes.resize_with(total, || SendOutcome::NotAttempted);

        PublishReport {
            address,
            outcomes,
            cancelled,
        }
    }
}
