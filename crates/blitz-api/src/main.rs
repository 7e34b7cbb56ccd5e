//! blitz operator CLI entry point.
//!
//! Binary name: `blitz`
//!
//! Loads configuration, starts the agent runtime, then dispatches to the
//! requested command handler.

mod cli;
mod state;

use clap::Parser;

use blitz_infra::config::{default_config_path, load_runtime_config};
use blitz_observe::tracing_setup::{LogFormat, init_tracing, shutdown_tracing};

use cli::Cli;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_runtime_config(&config_path).await;

    // Set up tracing based on verbosity
    let directive = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,blitz_core=debug,blitz_infra=debug",
        _ => "trace",
    };
    let format = if config.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_tracing(format, directive, config.logging.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    let state = AppState::init(&config, config_path, cli.command.connect_mode()).await?;
    let result = cli::dispatch(&state, cli.command, cli.json).await;

    state.shutdown().await;
    shutdown_tracing();
    result
}
