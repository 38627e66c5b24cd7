//! Common test utilities for sqs-pubsub integration tests
//!
//! This module provides:
//! - Session builders over the in-memory transport
//! - A recording message handler with scripted failures
//! - Publishing helpers

use async_trait::async_trait;
use sqs_pubsub_core::providers::memory::InMemoryConfig;
use sqs_pubsub_core::{
    CancelToken, InMemoryTransport, InboundMessage, MessageHandler, MessageId, OutboundMessage,
    QueueName, QueueRef, QueueSession, RetryPolicy,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[allow(dead_code)]
/// Visibility timeout used by the in-memory queues in these tests
pub const VISIBILITY: Duration = Duration::from_secs(30);

/// Deterministic retry policy: 3 attempts, 250ms base, 2s cap, no jitter
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(250), Duration::from_secs(2)).without_jitter()
}

pub fn memory_transport() -> Arc<InMemoryTransport> {
    Arc::new(InMemoryTransport::new(InMemoryConfig {
        default_visibility_timeout: VISIBILITY,
        ..InMemoryConfig::default()
    }))
}

pub fn session(transport: &Arc<InMemoryTransport>) -> QueueSession {
    QueueSession::new(transport.clone(), fast_retry(), CancelToken::never())
}

pub async fn provision(session: &QueueSession, name: &str) -> QueueRef {
    let name = QueueName::new(name.to_string()).expect("valid queue name");
    session
        .provisioner
        .ensure(&name, 86_400)
        .await
        .expect("queue provisioned")
}

/// Publish `count` bodies `msg-0..msg-{count-1}` without pacing
pub async fn publish_numbered(
    session: &QueueSession,
    queue: &QueueRef,
    count: usize,
) -> Vec<MessageId> {
    let messages = (0..count)
        .map(|i| OutboundMessage::new(format!("msg-{}", i)))
        .collect();
    session
        .publisher
        .run(queue, messages, Duration::ZERO)
        .await
        .into_result()
        .expect("all messages sent")
}

/// Handler recording every body it sees, failing on scripted bodies
#[derive(Debug, Default, Clone)]
#[allow(dead_code)]
pub struct RecordingHandler {
    seen: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<HashSet<String>>>,
}

impl RecordingHandler {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn fail_on(&self, body: &str) {
        self.fail_on.lock().unwrap().insert(body.to_string());
    }

    #[allow(dead_code)]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(message.body.clone());
        if self.fail_on.lock().unwrap().contains(&message.body) {
            anyhow::bail!("scripted failure for {}", message.body);
        }
        Ok(())
    }
}
