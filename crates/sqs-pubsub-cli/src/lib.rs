//! # SQS Pub/Sub CLI
//!
//! Command-line front end for the publish/subscribe demo.
//!
//! This module provides:
//! - The `publish` and `subscribe` commands
//! - Layered configuration loading (files, then environment)
//! - Logging initialization
//! - Ctrl+C / SIGTERM wiring to the session cancellation signal
//! - Exit code mapping for terminal failures

use clap::{Parser, Subcommand};
use sqs_pubsub_core::config::LoggingConfig;
use sqs_pubsub_core::{
    CancelToken, Canceller, ConfigurationError, DemoConfig, InboundMessage, MessageId,
    OutboundMessage, PollReport, ProvisionError, PublishError, QueueAttributes, QueueName, QueueRef,
    QueueSession, QueueTransport, ReceiveError, SqsTransport, Timestamp, TransportError,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "SQS_PUBSUB_CONFIG";

/// Prefix of configuration environment variables (`SQS_PUBSUB__QUEUE__NAME`)
pub const ENV_PREFIX: &str = "SQS_PUBSUB";

/// Optional configuration file in the working directory, any supported format
pub const LOCAL_CONFIG_BASENAME: &str = "config/sqs-pubsub";

// ============================================================================
// CLI Structure
// ============================================================================

/// Minimal publish/subscribe demo against AWS SQS
#[derive(Debug, Parser)]
#[command(name = "sqs-pubsub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish and receive demo messages through an SQS queue")]
#[command(
    long_about = "Publishes a paced batch of greeting messages to an SQS queue, or receives and \
                  acknowledges one batch from it. Configuration is read from \
                  config/sqs-pubsub.{toml,yaml,json}, the file named by SQS_PUBSUB_CONFIG and \
                  SQS_PUBSUB__* environment variables."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Ensure the queue exists and publish the demo messages
    Publish,

    /// Ensure the queue exists, receive one batch and acknowledge it
    Subscribe,
}

// ============================================================================
// Errors
// ============================================================================

/// CLI errors; each variant maps to a process exit code
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },

    #[error("Transport setup failed: {0}")]
    Transport(#[source] TransportError),

    #[error("Provisioning failed: {0}")]
    Provision(#[source] ProvisionError),

    #[error("Publishing failed: {0}")]
    Publish(#[source] PublishError),

    #[error("Receiving failed: {0}")]
    Receive(#[source] ReceiveError),

    #[error("Cancelled by signal")]
    Cancelled,
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Logging { .. } | Self::Transport(_) => 1,
            Self::Provision(_) => 2,
            Self::Publish(_) => 3,
            Self::Receive(_) => 4,
            Self::Cancelled => 130,
        }
    }
}

impl From<ProvisionError> for CliError {
    fn from(error: ProvisionError) -> Self {
        match &error {
            ProvisionError::Failed { source, .. } if source.is_cancelled() => Self::Cancelled,
            _ => Self::Provision(error),
        }
    }
}

impl From<ReceiveError> for CliError {
    fn from(error: ReceiveError) -> Self {
        match &error {
            ReceiveError::Failed { source, .. } if source.is_cancelled() => Self::Cancelled,
            _ => Self::Receive(error),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{0}")]
    Invalid(#[from] ConfigurationError),
}

// ============================================================================
// Configuration
// ============================================================================

/// The sources layered into a [`DemoConfig`], later ones overriding earlier
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Optional file base name; a missing file is ignored
    pub local_file: Option<PathBuf>,

    /// Explicit file; must exist when set
    pub explicit_file: Option<PathBuf>,

    /// Environment snapshot; `None` reads the process environment
    pub environment: Option<HashMap<String, String>>,
}

impl ConfigSources {
    /// Sources used by the binary: local file, `SQS_PUBSUB_CONFIG`, process env
    pub fn from_process() -> Self {
        Self {
            local_file: Some(PathBuf::from(LOCAL_CONFIG_BASENAME)),
            explicit_file: std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from),
            environment: None,
        }
    }
}

/// Load and validate configuration from the given sources
pub fn load_configuration(sources: &ConfigSources) -> Result<DemoConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(local) = &sources.local_file {
        builder = builder.add_source(config::File::from(local.as_path()).required(false));
    }

    if let Some(explicit) = &sources.explicit_file {
        builder = builder.add_source(config::File::from(explicit.as_path()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(sources.environment.clone()),
    );

    let config: DemoConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global subscriber; `RUST_LOG` overrides the configured level
pub fn initialize_logging(logging: &LoggingConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| CliError::Logging {
            message: format!("invalid log level '{}': {}", logging.level, e),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if logging.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Signals
// ============================================================================

/// Cancel `canceller` on the first Ctrl+C or SIGTERM
pub fn spawn_signal_handler(canceller: Arc<Canceller>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, cancelling");
        canceller.cancel();
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Run the CLI for the current process
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = match load_configuration(&ConfigSources::from_process()) {
        Ok(config) => config,
        Err(e) => {
            // Best effort so the failure itself gets logged
            let _ = initialize_logging(&LoggingConfig::default());
            return Err(e.into());
        }
    };
    initialize_logging(&config.logging)?;

    info!(
        command = ?cli.command,
        queue = %config.queue.name,
        region = %config.aws.region,
        "Starting sqs-pubsub"
    );

    let transport: Arc<dyn QueueTransport> =
        Arc::new(SqsTransport::new(&config.aws).map_err(CliError::Transport)?);

    let canceller = Arc::new(Canceller::new());
    let signals = spawn_signal_handler(canceller.clone());

    let result = match cli.command {
        Commands::Publish => run_publish(transport, &config, canceller.token())
            .await
            .map(|_| ()),
        Commands::Subscribe => run_subscribe(transport, &config, canceller.token())
            .await
            .map(|_| ()),
    };

    signals.abort();
    result
}

/// Ensure the queue and publish `message_count` greetings, paced
pub async fn run_publish(
    transport: Arc<dyn QueueTransport>,
    config: &DemoConfig,
    cancel: CancelToken,
) -> Result<Vec<MessageId>, CliError> {
    let session = QueueSession::from_settings(transport, &config.retry, cancel);
    let queue = ensure_queue(&session, config).await?;

    let report = session
        .publisher
        .run_with(
            &queue,
            config.publish.message_count,
            config.publish.pacing(),
            |_| OutboundMessage::greeting(Timestamp::now()),
        )
        .await;

    if report.was_cancelled() {
        warn!(
            sent = report.succeeded_count(),
            total = report.total(),
            "Publishing cancelled"
        );
        return Err(CliError::Cancelled);
    }

    let ids = report.into_result().map_err(CliError::Publish)?;
    for id in &ids {
        info!(message_id = %id, "Published");
    }
    info!(count = ids.len(), "done");

    Ok(ids)
}

/// Ensure the queue, receive one batch, log and acknowledge every message
pub async fn run_subscribe(
    transport: Arc<dyn QueueTransport>,
    config: &DemoConfig,
    cancel: CancelToken,
) -> Result<PollReport, CliError> {
    let session = QueueSession::from_settings(transport, &config.retry, cancel);
    let queue = ensure_queue(&session, config).await?;

    let handler = |message: &InboundMessage| -> anyhow::Result<()> {
        info!(message_id = %message.id, body = %message.body, "Message");
        Ok(())
    };

    let report = session
        .poller
        .run(
            &queue,
            config.subscribe.max_messages,
            config.subscribe.wait_seconds,
            &handler,
            &session.acknowledger,
        )
        .await?;

    if report.received_count() == 0 {
        info!("No messages received");
    } else {
        info!(count = report.received_count(), "Received messages");
    }

    for failure in report.ack_failures() {
        warn!(message_id = %failure.message_id, error = %failure, "Message not acknowledged");
    }

    if report.was_cancelled() {
        return Err(CliError::Cancelled);
    }

    info!(
        acknowledged = report.acknowledged_count(),
        ack_failed = report.ack_failed_count(),
        "done"
    );
    Ok(report)
}

async fn ensure_queue(session: &QueueSession, config: &DemoConfig) -> Result<QueueRef, CliError> {
    let name = QueueName::new(config.queue.name.clone()).map_err(|e| {
        ConfigError::Invalid(ConfigurationError::Invalid {
            message: format!("queue.name: {}", e),
        })
    })?;

    let mut attributes = QueueAttributes::with_retention(config.queue.retention_seconds);
    if let Some(visibility) = config.queue.visibility_timeout_seconds {
        attributes = attributes.with_visibility_timeout(visibility);
    }

    let queue = session
        .provisioner
        .ensure_with_attributes(&name, attributes)
        .await?;

    info!(queue = %queue.name(), address = %queue.address(), "Queue address");
    Ok(queue)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
