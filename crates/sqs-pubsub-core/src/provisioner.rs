//! Queue provisioning.
//!
//! [`QueueProvisioner::ensure`] turns a queue name into a [`QueueRef`],
//! creating the queue when needed. Resolved queues are cached per name for
//! the lifetime of the provisioner, so repeated calls cost at most one
//! creation request.

use crate::config::{MAX_RETENTION_SECONDS, MIN_RETENTION_SECONDS};
use crate::error::ProvisionError;
use crate::message::{QueueName, QueueRef};
use crate::retry::RetryableClient;
use crate::transport::QueueAttributes;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "provisioner_tests.rs"]
mod tests;

/// Creates queues and caches the resulting references
#[derive(Debug)]
pub struct QueueProvisioner {
    client: RetryableClient,
    cache: RwLock<HashMap<QueueName, (QueueAttributes, QueueRef)>>,
}

impl QueueProvisioner {
    pub fn new(client: RetryableClient) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Ensure a queue with the given retention exists
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidRetention`] if `retention_seconds` is outside
    ///   the range the service accepts; no request is made
    /// - [`ProvisionError::Failed`] if the service rejects the request or
    ///   retries are exhausted
    pub async fn ensure(
        &self,
        name: &QueueName,
        retention_seconds: u32,
    ) -> Result<QueueRef, ProvisionError> {
        self.ensure_with_attributes(name, QueueAttributes::with_retention(retention_seconds))
            .await
    }

    /// Ensure a queue with the given attributes exists
    pub async fn ensure_with_attributes(
        &self,
        name: &QueueName,
        attributes: QueueAttributes,
    ) -> Result<QueueRef, ProvisionError> {
        let retention = attributes.retention_seconds;
        if !(MIN_RETENTION_SECONDS..=MAX_RETENTION_SECONDS).contains(&retention) {
            return Err(ProvisionError::InvalidRetention {
                queue_name: name.to_string(),
                seconds: retention,
                min: MIN_RETENTION_SECONDS,
                max: MAX_RETENTION_SECONDS,
            });
        }

        {
            let cache = self.cache.read().await;
            if let Some((cached_attributes, queue_ref)) = cache.get(name) {
                if *cached_attributes == attributes {
                    debug!(queue = %name, "Queue already provisioned");
                    return Ok(queue_ref.clone());
                }
            }
        }

        let address = self
            .client
            .create_queue(name, &attributes)
            .await
            .map_err(|source| {
                warn!(queue = %name, error = %source, "Queue provisioning failed");
                ProvisionError::Failed {
                    queue_name: name.to_string(),
                    source,
                }
            })?;

        info!(queue = %name, address = %address, "Queue ready");

        let queue_ref = QueueRef::new(name.clone(), address);
        self.cache
            .write()
            .await
            .insert(name.clone(), (attributes, queue_ref.clone()));

        Ok(queue_ref)
    }
}
