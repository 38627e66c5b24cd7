use sqs_pubsub_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "sqs-pubsub failed");
        eprintln!("sqs-pubsub: {}", e);

        std::process::exit(e.exit_code());
    }
}
