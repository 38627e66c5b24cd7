//! Wiring of the queue components for one process invocation.

use crate::acknowledger::Acknowledger;
use crate::cancel::CancelToken;
use crate::config::RetrySettings;
use crate::poller::Poller;
use crate::provisioner::QueueProvisioner;
use crate::publisher::Publisher;
use crate::retry::{RetryPolicy, RetryableClient};
use crate::transport::QueueTransport;
use std::sync::Arc;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// The components of one publish or subscribe session
///
/// All components share one [`RetryableClient`], and with it the transport,
/// the retry policy and the cancellation token.
#[derive(Debug)]
pub struct QueueSession {
    pub provisioner: QueueProvisioner,
    pub publisher: Publisher,
    pub poller: Poller,
    pub acknowledger: Acknowledger,
}

impl QueueSession {
    pub fn new(transport: Arc<dyn QueueTransport>, policy: RetryPolicy, cancel: CancelToken) -> Self {
        let client = RetryableClient::new(transport, policy, cancel);
        Self {
            provisioner: QueueProvisioner::new(client.clone()),
            publisher: Publisher::new(client.clone()),
            poller: Poller::new(client.clone()),
            acknowledger: Acknowledger::new(client),
        }
    }

    pub fn from_settings(
        transport: Arc<dyn QueueTransport>,
        retry: &RetrySettings,
        cancel: CancelToken,
    ) -> Self {
        Self::new(transport, RetryPolicy::from(retry), cancel)
    }
}
