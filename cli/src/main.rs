// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # VIGIL CLI
//!
//! The `vigil` binary runs the orchestrator daemon and talks to it.
//!
//! ## Commands
//!
//! - `vigil daemon run|start|stop|status` - Daemon lifecycle
//! - `vigil trigger` - Submit an alert, schedule or API trigger
//! - `vigil task list|status|checkpoints|invocations|actions|cancel` - Task inspection
//! - `vigil knowledge add|query|stats` - Knowledge store curation
//! - `vigil config show|validate|generate` - Configuration management
//! - `vigil db migrate|status` - PostgreSQL schema management
//!
//! Client commands reach the daemon over its HTTP API at `--host`/`--port`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use vigil_cli::commands::{
    self, ConfigCommand, DaemonCommand, DbCommand, KnowledgeCommand, TaskCommand, TriggerArgs,
};
use vigil_cli::daemon::ClientTarget;

/// VIGIL - multi-agent incident response for SRE teams
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "VIGIL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Daemon API host
    #[arg(long, global = true, env = "VIGIL_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Daemon API port (default: spec.api.port)
    #[arg(long, global = true, env = "VIGIL_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VIGIL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (compact, json)
    #[arg(long, global = true, env = "VIGIL_LOG_FORMAT", default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the orchestrator daemon
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Submit a trigger to the running daemon
    #[command(name = "trigger")]
    Trigger(TriggerArgs),

    /// Inspect and cancel tasks
    #[command(name = "task")]
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Curate the knowledge store
    #[command(name = "knowledge")]
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Database schema management
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;

    let target = ClientTarget::new(&cli.host, cli.port);

    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, cli.config, target).await
        }
        Some(Commands::Trigger(args)) => commands::trigger::handle_command(args, target).await,
        Some(Commands::Task { command }) => commands::task::handle_command(command, target).await,
        Some(Commands::Knowledge { command }) => {
            commands::knowledge::handle_command(command, target).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Db { command }) => commands::db::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_current_span(false).init(),
        "compact" => builder.with_target(false).compact().init(),
        other => anyhow::bail!("Unknown log format '{}' (expected compact or json)", other),
    }

    Ok(())
}
