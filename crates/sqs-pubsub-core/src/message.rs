//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated SQS queue name
///
/// 1-80 characters of ASCII alphanumerics, hyphens and underscores. FIFO queue
/// names carry a `.fifo` suffix which counts towards the 80 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Maximum queue name length accepted by SQS
    pub const MAX_LENGTH: usize = 80;

    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LENGTH),
            });
        }

        let base = name.strip_suffix(".fifo").unwrap_or(&name);
        if base.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "name cannot consist of the .fifo suffix only".to_string(),
            });
        }

        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(".fifo")
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Opaque queue address returned by provisioning
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAddress(Url);

impl QueueAddress {
    /// Parse an address returned by the queue service
    pub fn parse(address: &str) -> Result<Self, ValidationError> {
        Url::parse(address)
            .map(Self)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "queue_address".to_string(),
                message: e.to_string(),
            })
    }

    pub fn from_url(url: Url) -> Self {
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provisioned queue; only obtainable from a successful provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRef {
    name: QueueName,
    address: QueueAddress,
}

impl QueueRef {
    pub(crate) fn new(name: QueueName, address: QueueAddress) -> Self {
        Self { name, address }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn address(&self) -> &QueueAddress {
        &self.address
    }
}

/// Service-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// One-time credential proving receipt of a specific delivery
///
/// Not `Clone`: the acknowledger takes it by value, so a caller holds it at
/// most once.
#[derive(PartialEq, Eq)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ReceiptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Receipt handles are long; the prefix is enough to correlate logs
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "ReceiptToken({}...)", prefix)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds since the Unix epoch
    pub fn unix_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    pub created_at: Timestamp,
}

impl OutboundMessage {
    /// Create new message with body, stamped with the current time
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            created_at: Timestamp::now(),
        }
    }

    /// The demo greeting carrying its creation time in Unix milliseconds
    pub fn greeting(created_at: Timestamp) -> Self {
        Self {
            body: format!("Hello, world! Time is {}", created_at.unix_millis()),
            created_at,
        }
    }
}

/// A message received from the queue
#[derive(Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub body: String,
    pub receipt: ReceiptToken,
    /// Number of times the service has delivered this message, when reported
    pub receive_count: Option<u32>,
}

impl InboundMessage {
    /// Check if this delivery is a redelivery of an earlier receive
    pub fn is_redelivery(&self) -> bool {
        self.receive_count.is_some_and(|count| count > 1)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
