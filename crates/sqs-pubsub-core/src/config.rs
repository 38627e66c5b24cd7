//! Configuration types for the demo session.
//!
//! Every section carries serde defaults so a partially specified source (or no
//! source at all) still yields a complete configuration. Loading and layering
//! of sources is the CLI's job; this module only defines the shape and
//! [`DemoConfig::validate`].

use crate::error::ConfigurationError;
use crate::message::QueueName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service limit on messages returned by a single receive
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Service limit on the long-poll wait of a single receive
pub const MAX_WAIT_SECONDS: u32 = 20;

/// Smallest retention period SQS accepts (one minute)
pub const MIN_RETENTION_SECONDS: u32 = 60;

/// Largest retention period SQS accepts (fourteen days)
pub const MAX_RETENTION_SECONDS: u32 = 1_209_600;

/// Complete configuration for one CLI invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub queue: QueueSettings,
    pub aws: AwsSqsConfig,
    pub publish: PublishSettings,
    pub subscribe: SubscribeSettings,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
}

impl DemoConfig {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        QueueName::new(self.queue.name.clone()).map_err(|e| ConfigurationError::Invalid {
            message: format!("queue.name: {}", e),
        })?;

        if !(MIN_RETENTION_SECONDS..=MAX_RETENTION_SECONDS).contains(&self.queue.retention_seconds)
        {
            return Err(invalid(format!(
                "queue.retention_seconds must be within {}..={}, got {}",
                MIN_RETENTION_SECONDS, MAX_RETENTION_SECONDS, self.queue.retention_seconds
            )));
        }

        if let Some(visibility) = self.queue.visibility_timeout_seconds {
            if visibility > 43_200 {
                return Err(invalid(format!(
                    "queue.visibility_timeout_seconds must be at most 43200, got {}",
                    visibility
                )));
            }
        }

        if self.aws.region.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "aws.region".to_string(),
            });
        }

        if self.aws.request_timeout_seconds <= u64::from(MAX_WAIT_SECONDS) {
            return Err(invalid(format!(
                "aws.request_timeout_seconds must exceed the {}s long-poll limit, got {}",
                MAX_WAIT_SECONDS, self.aws.request_timeout_seconds
            )));
        }

        if self.publish.message_count == 0 {
            return Err(invalid("publish.message_count must be at least 1".to_string()));
        }

        if self.subscribe.max_messages == 0 || self.subscribe.max_messages > MAX_RECEIVE_BATCH {
            return Err(invalid(format!(
                "subscribe.max_messages must be within 1..={}, got {}",
                MAX_RECEIVE_BATCH, self.subscribe.max_messages
            )));
        }

        if self.subscribe.wait_seconds > MAX_WAIT_SECONDS {
            return Err(invalid(format!(
                "subscribe.wait_seconds must be at most {}, got {}",
                MAX_WAIT_SECONDS, self.subscribe.wait_seconds
            )));
        }

        self.retry.validate()
    }
}

fn invalid(message: String) -> ConfigurationError {
    ConfigurationError::Invalid { message }
}

/// Queue identity and attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub retention_seconds: u32,
    pub visibility_timeout_seconds: Option<u32>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "tony_demo".to_string(),
            retention_seconds: 86_400, // one day
            visibility_timeout_seconds: None,
        }
    }
}

/// AWS SQS configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSqsConfig {
    pub region: String,
    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for AwsSqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl std::fmt::Debug for AwsSqsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSqsConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Settings for the `publish` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub message_count: usize,
    pub pacing_ms: u64,
}

impl PublishSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            message_count: 5,
            pacing_ms: 1000,
        }
    }
}

/// Settings for the `subscribe` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeSettings {
    pub max_messages: u32,
    pub wait_seconds: u32,
}

impl Default for SubscribeSettings {
    fn default() -> Self {
        Self {
            max_messages: MAX_RECEIVE_BATCH,
            wait_seconds: 10,
        }
    }
}

/// Retry behaviour for transient transport failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl RetrySettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1".to_string()));
        }

        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(invalid(format!(
                "retry.backoff_base_ms ({}) must not exceed retry.backoff_cap_ms ({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(invalid(format!(
                "retry.jitter_percent must be within 0.0..=1.0, got {}",
                self.jitter_percent
            )));
        }

        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_base_ms: 200,
            backoff_cap_ms: 5_000,
            jitter_percent: 0.25,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Enable JSON structured logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
