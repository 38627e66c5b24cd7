//! In-memory queue transport for testing and offline runs.
//!
//! This module provides a fully functional in-process queue that:
//! - Creates queues idempotently and rejects attribute mismatches
//! - Implements long-poll receives that wake as soon as a message arrives
//! - Hides received messages for a visibility timeout and redelivers them
//!   under a fresh receipt if they are not deleted in time
//! - Rejects stale receipts
//! - Supports scripted fault injection and per-operation call counters
//!
//! Time is measured with [`tokio::time::Instant`], so tests running with a
//! paused clock can step through visibility timeouts deterministically.

use crate::error::{Operation, TransportError};
use crate::message::{InboundMessage, MessageId, QueueAddress, QueueName, ReceiptToken};
use crate::transport::{QueueAttributes, QueueTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// In-memory transport configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Visibility timeout for queues created without one
    pub default_visibility_timeout: Duration,
    pub max_batch_size: u32,
    pub max_message_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout: Duration::from_secs(30),
            max_batch_size: 10,
            max_message_size: 256 * 1024,
        }
    }
}

/// Visible and in-flight message counts of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    pub visible: usize,
    pub in_flight: usize,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct Storage {
    /// Queues keyed by address
    queues: HashMap<String, QueueState>,
    faults: VecDeque<(Operation, TransportError)>,
    calls: HashMap<Operation, usize>,
    queues_created: usize,
}

impl Storage {
    fn queue_mut(&mut self, address: &QueueAddress) -> Result<&mut QueueState, TransportError> {
        self.queues
            .get_mut(address.as_str())
            .ok_or_else(|| TransportError::QueueNotFound {
                message: format!("no queue at {}", address),
            })
    }

    /// Count the call and pop the first fault scripted for it
    fn begin_call(&mut self, operation: Operation) -> Result<(), TransportError> {
        *self.calls.entry(operation).or_insert(0) += 1;

        match self.faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => match self.faults.remove(index) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }
}

struct QueueState {
    attributes: QueueAttributes,
    visibility_timeout: Duration,
    visible: VecDeque<StoredMessage>,
    /// In-flight deliveries keyed by receipt
    in_flight: HashMap<String, InFlightMessage>,
}

impl QueueState {
    /// Return deliveries whose visibility timeout has elapsed to the queue
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                debug!(message_id = %flight.message.id, "Visibility timeout elapsed, message visible again");
                self.visible.push_back(flight.message);
            }
        }
    }

    fn deliver(&mut self, max_messages: u32, now: Instant) -> Vec<InboundMessage> {
        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            let Some(mut message) = self.visible.pop_front() else {
                break;
            };
            message.receive_count += 1;

            let receipt = uuid::Uuid::new_v4().to_string();
            batch.push(InboundMessage {
                id: message.id.clone(),
                body: message.body.clone(),
                receipt: ReceiptToken::new(receipt.clone()),
                receive_count: Some(message.receive_count),
            });
            self.in_flight.insert(
                receipt,
                InFlightMessage {
                    message,
                    visible_at: now + self.visibility_timeout,
                },
            );
        }
        batch
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.in_flight.values().map(|flight| flight.visible_at).min()
    }
}

#[derive(Clone)]
struct StoredMessage {
    id: MessageId,
    body: String,
    receive_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport
pub struct InMemoryTransport {
    storage: Mutex<Storage>,
    arrivals: Notify,
    config: InMemoryConfig,
}

impl InMemoryTransport {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Mutex::new(Storage::default()),
            arrivals: Notify::new(),
            config,
        }
    }

    /// Address under which a queue of this name is exposed
    pub fn address_for(name: &QueueName) -> Result<QueueAddress, TransportError> {
        let mut url =
            url::Url::parse("memory://local/").map_err(|e| TransportError::Configuration {
                message: format!("in-memory base address: {}", e),
            })?;
        url.set_path(&format!("/{}", name.as_str()));
        Ok(QueueAddress::from_url(url))
    }

    /// Make the next call of `operation` fail with `error`
    ///
    /// Faults are consumed in the order they were injected. A failed call has
    /// no side effect on the queue.
    pub fn inject_fault(&self, operation: Operation, error: TransportError) {
        self.lock().faults.push_back((operation, error));
    }

    /// Number of calls made for `operation`, failed ones included
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of queues actually created (idempotent re-creates excluded)
    pub fn queues_created(&self) -> usize {
        self.lock().queues_created
    }

    pub fn queue_depth(&self, name: &QueueName) -> Option<QueueDepth> {
        let address = Self::address_for(name).ok()?;
        self.lock()
            .queues
            .get(address.as_str())
            .map(|queue| QueueDepth {
                visible: queue.visible.len(),
                in_flight: queue.in_flight.len(),
            })
    }

    fn lock(&self) -> MutexGuard<'_, Storage> {
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueAddress, TransportError> {
        let mut storage = self.lock();
        storage.begin_call(Operation::CreateQueue)?;

        let address = Self::address_for(name)?;
        if let Some(existing) = storage.queues.get(address.as_str()) {
            if existing.attributes != *attributes {
                return Err(TransportError::QueueAlreadyExists {
                    message: format!(
                        "queue '{}' exists with {:?}, requested {:?}",
                        name, existing.attributes, attributes
                    ),
                });
            }
            return Ok(address);
        }

        let visibility_timeout = attributes
            .visibility_timeout_seconds
            .map(|seconds| Duration::from_secs(u64::from(seconds)))
            .unwrap_or(self.config.default_visibility_timeout);

        storage.queues.insert(
            address.as_str().to_string(),
            QueueState {
                attributes: *attributes,
                visibility_timeout,
                visible: VecDeque::new(),
                in_flight: HashMap::new(),
            },
        );
        storage.queues_created += 1;
        debug!(queue = %name, address = %address, "Created in-memory queue");

        Ok(address)
    }

    async fn send_message(
        &self,
        address: &QueueAddress,
        body: &str,
    ) -> Result<MessageId, TransportError> {
        let message_id = {
            let mut storage = self.lock();
            storage.begin_call(Operation::SendMessage)?;

            if body.is_empty() || body.len() > self.config.max_message_size {
                return Err(TransportError::BadRequest {
                    code: "InvalidParameterValue".to_string(),
                    message: format!(
                        "message body must be 1-{} bytes, got {}",
                        self.config.max_message_size,
                        body.len()
                    ),
                });
            }

            let queue = storage.queue_mut(address)?;
            let message_id = MessageId::new();
            queue.visible.push_back(StoredMessage {
                id: message_id.clone(),
                body: body.to_string(),
                receive_count: 0,
            });
            message_id
        };

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        {
            let mut storage = self.lock();
            storage.begin_call(Operation::ReceiveMessage)?;
            if max_messages == 0 || max_messages > self.config.max_batch_size {
                return Err(TransportError::BadRequest {
                    code: "InvalidParameterValue".to_string(),
                    message: format!(
                        "MaxNumberOfMessages must be within 1..={}, got {}",
                        self.config.max_batch_size, max_messages
                    ),
                });
            }
            storage.queue_mut(address)?;
        }

        let deadline = Instant::now() + wait;

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_visible_at = {
                let mut storage = self.lock();
                let queue = storage.queue_mut(address)?;
                let now = Instant::now();
                queue.requeue_expired(now);

                let batch = queue.deliver(max_messages, now);
                if !batch.is_empty() {
                    return Ok(batch);
                }
                queue.next_visible_at()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible_at.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        address: &QueueAddress,
        receipt: &ReceiptToken,
    ) -> Result<(), TransportError> {
        let mut storage = self.lock();
        storage.begin_call(Operation::DeleteMessage)?;

        let queue = storage.queue_mut(address)?;
        queue.requeue_expired(Instant::now());

        match queue.in_flight.remove(receipt.as_str()) {
            Some(flight) => {
                debug!(message_id = %flight.message.id, "Deleted in-memory message");
                Ok(())
            }
            None => Err(TransportError::InvalidReceipt {
                message: format!("receipt {:?} is not in flight on {}", receipt, address),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
