// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon lifecycle management commands
//!
//! Commands: run, start, stop, status

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::daemon::{check_daemon_running, run_daemon, stop_daemon, ClientTarget, DaemonStatus};
use vigil_core::domain::config::OrchestratorConfigManifest;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground
    Run,

    /// Start the daemon in the background (if not already running)
    Start,

    /// Stop the daemon gracefully
    Stop {
        /// Force kill if daemon doesn't stop gracefully
        #[arg(short, long)]
        force: bool,

        /// Timeout in seconds (default: 30)
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Check daemon status
    Status,
}

pub async fn handle_command(
    command: DaemonCommand,
    config_path: Option<PathBuf>,
    target: ClientTarget,
) -> Result<()> {
    match command {
        DaemonCommand::Run => run_daemon(config_path, target.port).await,
        DaemonCommand::Start => start(config_path, target).await,
        DaemonCommand::Stop { force, timeout } => stop(force, timeout, &target).await,
        DaemonCommand::Status => status(&target).await,
    }
}

async fn start(config_path: Option<PathBuf>, target: ClientTarget) -> Result<()> {
    // Fail fast on a broken config instead of inside the detached process
    let manifest = OrchestratorConfigManifest::load_or_default(config_path.clone())
        .context("Failed to load configuration")?;
    manifest.validate().context("Configuration validation failed")?;

    if manifest.spec.gateway.policy.rules.is_empty() {
        println!("{}", "WARNING: the execution policy has no rules.".yellow().bold());
        println!("{}", "         Every remediation will be denied and escalated.".yellow());
    }

    // Probe the port the daemon will listen on
    let target = ClientTarget::new(&target.host, Some(target.port.unwrap_or(manifest.spec.api.port)));

    info!("Checking if daemon is already running...");
    match check_daemon_running(&target).await {
        Ok(DaemonStatus::Running { pid, .. }) => {
            println!("{}", format!("✓ Daemon already running (PID: {})", pid).green());
            println!("Use 'vigil daemon stop' to stop it first.");
            return Ok(());
        }
        Ok(DaemonStatus::Stopped) => {
            info!("Daemon not running, starting...");
        }
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            warn!("Daemon PID {} exists but unhealthy (error: {}), stopping...", pid, error);
            stop_daemon(false, 10).await?;
        }
        Err(e) => {
            warn!("Failed to check daemon status: {}", e);
        }
    }

    // Re-exec self in the foreground mode, detached
    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut cmd = std::process::Command::new(current_exe);
    cmd.arg("daemon").arg("run");
    if let Some(port) = target.port {
        cmd.arg("--port").arg(port.to_string());
    }
    if let Some(config) = config_path {
        cmd.arg("--config").arg(config);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let temp_dir = std::env::temp_dir();
    let stdout_path = temp_dir.join("vigil.out");
    let stderr_path = temp_dir.join("vigil.err");

    let stdout_file = std::fs::File::create(&stdout_path).context("Failed to create stdout log file")?;
    let stderr_file = std::fs::File::create(&stderr_path).context("Failed to create stderr log file")?;

    cmd.stdin(std::process::Stdio::null())
        .stdout(stdout_file)
        .stderr(stderr_file);

    println!("Redirecting logs to: {}", stdout_path.display());

    let child = cmd.spawn().context("Failed to spawn daemon process")?;

    println!("{}", format!("✓ Daemon starting (PID: {})", child.id()).green());
    println!("Check status with: vigil daemon status");

    Ok(())
}

async fn stop(force: bool, timeout: u64, target: &ClientTarget) -> Result<()> {
    info!("Stopping daemon...");

    match check_daemon_running(target).await {
        Ok(DaemonStatus::Stopped) => {
            println!("{}", "ℹ Daemon not running".yellow());
        }
        Ok(DaemonStatus::Running { pid, .. }) | Ok(DaemonStatus::Unhealthy { pid, .. }) => {
            println!("Stopping daemon (PID: {})...", pid);
            stop_daemon(force, timeout).await?;
            println!("{}", "✓ Daemon stopped".green());
        }
        Err(e) => {
            println!("{}", format!("✗ Failed to check daemon: {}", e).red());
            return Err(e);
        }
    }

    Ok(())
}

async fn status(target: &ClientTarget) -> Result<()> {
    match check_daemon_running(target).await {
        Ok(DaemonStatus::Running { pid, uptime, queue_depth }) => {
            println!("{}", "✓ Daemon is running".green());
            println!("  PID: {}", pid);
            if let Some(uptime) = uptime {
                println!("  Uptime: {}", format_duration(uptime));
            }
            if let Some(depth) = queue_depth {
                println!("  Queued tasks: {}", depth);
            }
        }
        Ok(DaemonStatus::Stopped) => {
            println!("{}", "✗ Daemon is not running".red());
        }
        Ok(DaemonStatus::Unhealthy { pid, error }) => {
            println!("{}", format!("⚠ Daemon unhealthy (PID: {})", pid).yellow());
            println!("  Process exists but HTTP API check failed: {}", error);
            println!("  Check logs at /tmp/vigil.out and /tmp/vigil.err");
        }
        Err(e) => {
            println!("{}", format!("✗ Failed to check status: {}", e).red());
            return Err(e);
        }
    }

    Ok(())
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn uptime_is_rendered_coarsely() {
        assert_eq!(format_duration(59), "0m");
        assert_eq!(format_duration(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_duration(2 * 86400 + 3600), "2d 1h 0m");
    }
}
