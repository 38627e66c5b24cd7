//! # Retry Module
//!
//! Exponential backoff retry for transient queue service failures, and the
//! [`RetryableClient`] that routes every transport call through it.
//!
//! Delays are jittered so that several producers or consumers failing at the
//! same moment do not retry in lockstep.

use crate::cancel::CancelToken;
use crate::config::RetrySettings;
use crate::error::{CallError, Operation, TransportError};
use crate::message::{InboundMessage, MessageId, QueueAddress, QueueName, ReceiptToken};
use crate::transport::{QueueAttributes, QueueTransport};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration for exponential backoff
///
/// # Examples
///
/// ```rust
/// use sqs_pubsub_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 4 attempts, 200ms base, 5s cap, ±25% jitter
/// let policy = RetryPolicy::default();
///
/// // Custom policy
/// let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(5));
/// assert_eq!(policy.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub backoff_base: Duration,

    /// Upper bound for any single delay, jitter included
    pub backoff_cap: Duration,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as percentage (default 25% = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_cap: Duration::from_millis(settings.backoff_cap_ms),
            use_jitter: settings.jitter_percent > 0.0,
            jitter_percent: settings.jitter_percent.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with ±25% jitter
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_cap,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Disable jitter (deterministic delays, useful in tests)
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay before retry number `retry` (0-based)
    ///
    /// `base * 2^retry`, capped at `backoff_cap`, then jittered and capped again.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_secs = self.backoff_base.as_secs_f64() * 2f64.powi(retry.min(30) as i32);
        let cap_secs = self.backoff_cap.as_secs_f64();
        let capped_secs = base_secs.min(cap_secs);

        let final_secs = if self.use_jitter {
            Self::add_jitter(capped_secs, self.jitter_percent).min(cap_secs)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Check if another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

/// State tracker for a single retried call
#[derive(Debug, Clone)]
struct RetryState {
    /// Attempts made so far (the first call counts as one)
    attempts: u32,
}

impl RetryState {
    fn new() -> Self {
        Self { attempts: 1 }
    }

    fn next_attempt(&mut self) {
        self.attempts += 1;
    }

    /// 0-based retry index for the delay that precedes the next attempt
    fn retry_index(&self) -> u32 {
        self.attempts - 1
    }
}

// ============================================================================
// Retryable Client
// ============================================================================

/// Transport wrapper applying the retry policy to every call
///
/// Cheap to clone; clones share the transport and the cancellation token.
#[derive(Clone)]
pub struct RetryableClient {
    transport: Arc<dyn QueueTransport>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl std::fmt::Debug for RetryableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableClient")
            .field("transport", &self.transport.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryableClient {
    pub fn new(transport: Arc<dyn QueueTransport>, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueAddress, CallError> {
        let transport = self.transport.as_ref();
        self.execute(Operation::CreateQueue, name.as_str(), move || {
            transport.create_queue(name, attributes)
        })
        .await
    }

    pub async fn send_message(
        &self,
        address: &QueueAddress,
        body: &str,
    ) -> Result<MessageId, CallError> {
        let transport = self.transport.as_ref();
        self.execute(Operation::SendMessage, address.as_str(), move || {
            transport.send_message(address, body)
        })
        .await
    }

    pub async fn receive_messages(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, CallError> {
        let transport = self.transport.as_ref();
        self.execute(Operation::ReceiveMessage, address.as_str(), move || {
            transport.receive_messages(address, max_messages, wait)
        })
        .await
    }

    pub async fn delete_message(
        &self,
        address: &QueueAddress,
        receipt: &ReceiptToken,
    ) -> Result<(), CallError> {
        let transport = self.transport.as_ref();
        self.execute(Operation::DeleteMessage, address.as_str(), move || {
            transport.delete_message(address, receipt)
        })
        .await
    }

    /// Run `call` until it succeeds, fails fatally, exhausts the policy or
    /// is cancelled
    async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        target: &str,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut state = RetryState::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(CallError::Cancelled { operation });
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CallError::Cancelled { operation }),
                result = call() => result,
            };

            let error = match outcome {
                Ok(value) => {
                    if state.attempts > 1 {
                        debug!(
                            operation = %operation,
                            target = %target,
                            attempts = state.attempts,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                warn!(
                    operation = %operation,
                    target = %target,
                    error = %error,
                    "Non-retryable failure"
                );
                return Err(CallError::FatalRequest {
                    operation,
                    source: error,
                });
            }

            if !self.policy.should_retry(state.attempts) {
                warn!(
                    operation = %operation,
                    target = %target,
                    attempts = state.attempts,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(CallError::RetryExhausted {
                    operation,
                    attempts: state.attempts,
                    source: error,
                });
            }

            let delay = self.policy.calculate_delay(state.retry_index());
            warn!(
                operation = %operation,
                target = %target,
                attempt = state.attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );

            if self.cancel.sleep(delay).await.is_err() {
                return Err(CallError::Cancelled { operation });
            }
            state.next_attempt();
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
