//! CLI command definitions and dispatch for the `blitz` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! subsystem (e.g., `blitz tools list`, `blitz memory recall`).

pub mod health;
pub mod memory;
pub mod metrics;
pub mod tools;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use blitz_infra::runtime::ConnectMode;

use crate::state::AppState;

/// Operate the blitz agent tool and memory runtime.
#[derive(Parser)]
#[command(name = "blitz", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to blitz.toml (default: ~/.blitz/blitz.toml).
    #[arg(long, global = true, env = "BLITZ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and invoke registered tools.
    Tools {
        #[command(subcommand)]
        action: tools::ToolsCommand,
    },

    /// Store, recall and prune semantic memory.
    #[command(alias = "mem")]
    Memory {
        #[command(subcommand)]
        action: memory::MemoryCommand,
    },

    /// Show the runtime metrics snapshot.
    Metrics,

    /// Check the tool backend and the memory store.
    Health,
}

impl Commands {
    /// Memory and metrics commands never need the tool backend.
    pub fn connect_mode(&self) -> ConnectMode {
        match self {
            Commands::Tools { .. } | Commands::Health => ConnectMode::Online,
            Commands::Memory { .. } | Commands::Metrics => ConnectMode::Offline,
        }
    }
}

pub async fn dispatch(state: &AppState, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Tools { action } => tools::handle(state, action, json).await,
        Commands::Memory { action } => memory::handle(state, action, json).await,
        Commands::Metrics => metrics::show(state, json),
        Commands::Health => health::check(state, json).await,
    }
}

/// `✓` / `✗` in green / red.
pub(crate) fn check_mark(ok: bool) -> String {
    if ok {
        format!("{}", console::style("✓").green())
    } else {
        format!("{}", console::style("✗").red())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_tool_call_with_params() {
        let cli = Cli::parse_from([
            "blitz",
            "--json",
            "tools",
            "call",
            "execute-query",
            "--params",
            r#"{"query":"SELECT 1"}"#,
        ]);
        assert!(cli.json);
        assert_eq!(cli.command.connect_mode(), ConnectMode::Online);
        match cli.command {
            Commands::Tools {
                action: tools::ToolsCommand::Call { name, params },
            } => {
                assert_eq!(name, "execute-query");
                assert_eq!(params.as_deref(), Some(r#"{"query":"SELECT 1"}"#));
            }
            _ => panic!("expected tools call"),
        }
    }

    #[test]
    fn memory_commands_run_offline() {
        let cli = Cli::parse_from(["blitz", "mem", "recall", "coffee", "--thread", "t1", "-k", "3"]);
        assert_eq!(cli.command.connect_mode(), ConnectMode::Offline);
        match cli.command {
            Commands::Memory {
                action: memory::MemoryCommand::Recall { query, scope, top_k, .. },
            } => {
                assert_eq!(query, "coffee");
                assert_eq!(scope.thread.as_deref(), Some("t1"));
                assert_eq!(top_k, Some(3));
            }
            _ => panic!("expected memory recall"),
        }
    }
}
