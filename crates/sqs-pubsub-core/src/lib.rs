//! # SQS Pub/Sub Core
//!
//! Queue client core for a minimal publish/subscribe demo against AWS SQS.
//!
//! This library provides:
//! - Idempotent queue provisioning with a per-session cache
//! - Ordered, paced publishing with per-message reports
//! - Bounded-wait polling with a handle-then-acknowledge cycle
//! - Exponential backoff retry for transient service failures
//! - Cancellation of every blocking point from a single signal
//! - An SQS transport and an in-memory transport behind one trait
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, addresses, identifiers and messages
//! - [`config`] - Configuration shape and validation
//! - [`transport`] - The queue service boundary
//! - [`providers`] - SQS and in-memory transports
//! - [`retry`] - Retry policy and the retrying client
//! - [`provisioner`], [`publisher`], [`poller`], [`acknowledger`] - Components
//! - [`session`] - Component wiring for one invocation

// Module declarations
pub mod acknowledger;
pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod poller;
pub mod providers;
pub mod provisioner;
pub mod publisher;
pub mod retry;
pub mod session;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use acknowledger::Acknowledger;
pub use cancel::{CancelToken, Cancelled, Canceller};
pub use config::DemoConfig;
pub use error::{
    AckError, CallError, ConfigurationError, ErrorKind, Operation, ProvisionError, PublishError,
    ReceiveError, TransportError, ValidationError,
};
pub use message::{
    InboundMessage, MessageId, OutboundMessage, QueueAddress, QueueName, QueueRef, ReceiptToken,
    Timestamp,
};
pub use poller::{DeliveryRecord, Disposition, MessageHandler, PollReport, PollState, Poller};
pub use providers::{InMemoryTransport, SqsTransport};
pub use provisioner::QueueProvisioner;
pub use publisher::{PublishReport, Publisher, SendOutcome};
pub use retry::{RetryPolicy, RetryableClient};
pub use session::QueueSession;
pub use transport::{QueueAttributes, QueueTransport};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
