//! Boundary to the external queue service.

use crate::error::TransportError;
use crate::message::{InboundMessage, MessageId, QueueAddress, QueueName, ReceiptToken};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Attributes requested when creating a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAttributes {
    pub retention_seconds: u32,
    pub visibility_timeout_seconds: Option<u32>,
}

impl QueueAttributes {
    pub fn with_retention(retention_seconds: u32) -> Self {
        Self {
            retention_seconds,
            visibility_timeout_seconds: None,
        }
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout_seconds = Some(seconds);
        self
    }

    /// Attributes as SQS `Attribute.N.Name` / `Attribute.N.Value` pairs
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("MessageRetentionPeriod", self.retention_seconds.to_string())];
        if let Some(visibility) = self.visibility_timeout_seconds {
            pairs.push(("VisibilityTimeout", visibility.to_string()));
        }
        pairs
    }
}

/// Operations consumed from the queue service
///
/// Implementations perform exactly one service call per method and report
/// failures as classified [`TransportError`]s; retrying is the caller's
/// concern.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Create the queue, or return the address of an existing queue with
    /// compatible attributes
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueAddress, TransportError>;

    /// Send a single message; not idempotent on the wire
    async fn send_message(
        &self,
        address: &QueueAddress,
        body: &str,
    ) -> Result<MessageId, TransportError>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one
    async fn receive_messages(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// Delete the delivery identified by `receipt`
    async fn delete_message(
        &self,
        address: &QueueAddress,
        receipt: &ReceiptToken,
    ) -> Result<(), TransportError>;

    /// Short name of the backing service, for logs
    fn name(&self) -> &'static str;
}
