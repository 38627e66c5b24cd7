//! Queue transport implementations.
//!
//! Concrete implementations of [`crate::transport::QueueTransport`]: the AWS
//! SQS transport used in production and an in-memory transport for tests and
//! offline runs.

pub mod aws;
pub mod memory;

pub use aws::{AwsCredentials, SqsTransport};
pub use memory::{InMemoryConfig, InMemoryTransport, QueueDepth};
