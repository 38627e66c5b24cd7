//! Deletion of processed deliveries.

use crate::error::AckError;
use crate::message::{MessageId, QueueRef, ReceiptToken};
use crate::retry::RetryableClient;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "acknowledger_tests.rs"]
mod tests;

/// Confirms processing by deleting deliveries from the queue
#[derive(Debug, Clone)]
pub struct Acknowledger {
    client: RetryableClient,
}

impl Acknowledger {
    pub fn new(client: RetryableClient) -> Self {
        Self { client }
    }

    /// Delete the delivery identified by `receipt`
    ///
    /// The receipt is consumed: whatever the outcome, it cannot be presented
    /// again by this caller. A failure is logged and returned; the message
    /// becomes visible again once its visibility timeout elapses.
    pub async fn ack(
        &self,
        queue: &QueueRef,
        message_id: MessageId,
        receipt: ReceiptToken,
    ) -> Result<(), AckError> {
        match self.client.delete_message(queue.address(), &receipt).await {
            Ok(()) => {
                debug!(queue = %queue.name(), message_id = %message_id, "Message deleted");
                Ok(())
            }
            Err(source) => {
                let error = AckError {
                    address: queue.address().clone(),
                    message_id,
                    source,
                };
                warn!(queue = %queue.name(), error = %error, "Failed to delete message");
                Err(error)
            }
        }
    }
}
