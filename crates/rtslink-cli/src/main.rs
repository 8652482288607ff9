//! rtslink CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;

use rtslink_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration before logging so the config can raise the level
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logging(cli.verbose || config.log.verbose);

    CommandDispatcher::execute(cli, config)
        .await
        .context("Command execution failed")?;

    info!("rtslink exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
