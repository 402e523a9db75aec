//! insight-miner - pattern mining over the activity log

use insight_miner::cli;
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for detail).
    // Logs go to stderr; stdout carries the JSON summary.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    cli::run().await
}
