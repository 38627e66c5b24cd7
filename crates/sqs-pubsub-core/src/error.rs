//! Error types for queue operations.
//!
//! Errors are layered:
//!
//! - [`TransportError`] is what a [`crate::transport::QueueTransport`] reports for a
//!   single call. Each variant is classified as transient or fatal.
//! - [`CallError`] is what the [`crate::retry::RetryableClient`] surfaces once its
//!   retry budget has been applied.
//! - [`ProvisionError`], [`PublishError`], [`ReceiveError`] and [`AckError`] are the
//!   component-level errors. Their `Display` names the operation, the queue and
//!   the underlying cause.

use crate::message::{MessageId, QueueAddress};
use std::fmt;
use thiserror::Error;

/// Queue service operations routed through the retrying client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateQueue,
    SendMessage,
    ReceiveMessage,
    DeleteMessage,
}

impl Operation {
    /// Name of the operation as used by the queue service API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateQueue => "CreateQueue",
            Self::SendMessage => "SendMessage",
            Self::ReceiveMessage => "ReceiveMessage",
            Self::DeleteMessage => "DeleteMessage",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failed call may succeed if repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Fatal,
}

/// Failure of a single call against the queue service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request throttled ({code}): {message}")]
    Throttled { code: String, message: String },

    #[error("Service unavailable (HTTP {status}, {code}): {message}")]
    ServiceUnavailable {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Bad request ({code}): {message}")]
    BadRequest { code: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied ({code}): {message}")]
    PermissionDenied { code: String, message: String },

    #[error("Queue does not exist: {message}")]
    QueueNotFound { message: String },

    #[error("Queue already exists with different attributes: {message}")]
    QueueAlreadyExists { message: String },

    #[error("Receipt handle is invalid or expired: {message}")]
    InvalidReceipt { message: String },

    #[error("Malformed service response: {message}")]
    MalformedResponse { message: String },

    #[error("Invalid transport configuration: {message}")]
    Configuration { message: String },
}

impl TransportError {
    /// Classify the error for the retry loop
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Transient,
            Self::ConnectionFailed { .. } => ErrorKind::Transient,
            Self::Throttled { .. } => ErrorKind::Transient,
            Self::ServiceUnavailable { .. } => ErrorKind::Transient,
            Self::BadRequest { .. } => ErrorKind::Fatal,
            Self::AuthenticationFailed { .. } => ErrorKind::Fatal,
            Self::PermissionDenied { .. } => ErrorKind::Fatal,
            Self::QueueNotFound { .. } => ErrorKind::Fatal,
            Self::QueueAlreadyExists { .. } => ErrorKind::Fatal,
            Self::InvalidReceipt { .. } => ErrorKind::Fatal,
            Self::MalformedResponse { .. } => ErrorKind::Fatal,
            Self::Configuration { .. } => ErrorKind::Fatal,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Outcome of a call once the retry policy has been applied
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: Operation,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("{operation} rejected by the queue service: {source}")]
    FatalRequest {
        operation: Operation,
        #[source]
        source: TransportError,
    },

    #[error("{operation} cancelled before completion")]
    Cancelled { operation: Operation },
}

impl CallError {
    /// Operation that failed
    pub fn operation(&self) -> Operation {
        match self {
            Self::RetryExhausted { operation, .. } => *operation,
            Self::FatalRequest { operation, .. } => *operation,
            Self::Cancelled { operation } => *operation,
        }
    }

    /// Last transport failure behind this error, if any
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::RetryExhausted { source, .. } => Some(source),
            Self::FatalRequest { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Queue provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("CreateQueue for '{queue_name}': retention {seconds}s is outside {min}..={max}")]
    InvalidRetention {
        queue_name: String,
        seconds: u32,
        min: u32,
        max: u32,
    },

    #[error("CreateQueue for '{queue_name}' failed: {source}")]
    Failed {
        queue_name: String,
        #[source]
        source: CallError,
    },
}

/// Publishing failures
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("SendMessage of message {index} to {address} failed: {source}")]
    Send {
        address: QueueAddress,
        index: usize,
        #[source]
        source: CallError,
    },

    #[error("publish to {address} incomplete: {succeeded} of {total} messages sent, first failure: {cause}")]
    Incomplete {
        address: QueueAddress,
        succeeded: usize,
        total: usize,
        cause: String,
    },
}

/// Receive failures
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("ReceiveMessage from {address}: batch size {requested} is outside 1..={max}")]
    BatchSizeOutOfRange {
        address: QueueAddress,
        requested: u32,
        max: u32,
    },

    #[error("ReceiveMessage from {address}: wait of {requested}s exceeds the {max}s long-poll limit")]
    WaitTimeOutOfRange {
        address: QueueAddress,
        requested: u32,
        max: u32,
    },

    #[error("ReceiveMessage from {address} failed: {source}")]
    Failed {
        address: QueueAddress,
        #[source]
        source: CallError,
    },
}

/// Delete failure for a single message; never fatal to the poll cycle
#[derive(Debug, Error)]
#[error("DeleteMessage of {message_id} from {address} failed: {source}")]
pub struct AckError {
    pub address: QueueAddress,
    pub message_id: MessageId,
    #[source]
    pub source: CallError,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
