// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - PID file management
//! - HTTP health checks
//! - Graceful shutdown

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
#[cfg(unix)]
use tokio::time::sleep;
use tracing::info;
#[cfg(unix)]
use tracing::warn;

pub mod client;
pub mod server;

pub use client::DaemonClient;
pub use server::run_daemon;

#[cfg(unix)]
const PID_FILE: &str = "/var/run/vigil/vigil.pid";
#[cfg(unix)]
const PID_FILE_FALLBACK: &str = "/tmp/vigil.pid";

/// Matches `spec.api.port` when no config file overrides it.
pub const DEFAULT_API_PORT: u16 = 8400;

/// Where client commands find the daemon API.
#[derive(Debug, Clone)]
pub struct ClientTarget {
    pub host: String,
    /// `None` defers to the config file (daemon) or [`DEFAULT_API_PORT`] (client).
    pub port: Option<u16>,
}

impl ClientTarget {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        let port = self.port.unwrap_or(DEFAULT_API_PORT);
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), port)
        } else {
            format!("http://{}:{}", self.host, port)
        }
    }
}

#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: u32, uptime: Option<u64>, queue_depth: Option<u64> },
    Stopped,
    Unhealthy { pid: u32, error: String },
}

/// Check if daemon is running via HTTP health check (primary) or PID file (secondary)
pub async fn check_daemon_running(target: &ClientTarget) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;
    let health_url = format!("{}/health", target.base_url());

    // Remote daemons have no local PID file; report pid 0 for them.
    let pid_file = get_pid_file_path();
    let local_pid = std::fs::read_to_string(&pid_file)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.json::<serde_json::Value>().await.ok();
            let uptime = body.as_ref().and_then(|v| v["uptime_seconds"].as_u64());
            let queue_depth = body.as_ref().and_then(|v| v["queue_depth"].as_u64());
            Ok(DaemonStatus::Running {
                pid: local_pid.unwrap_or(0),
                uptime,
                queue_depth,
            })
        }
        Ok(resp) => Ok(DaemonStatus::Unhealthy {
            pid: local_pid.unwrap_or(0),
            error: format!("HTTP {}", resp.status()),
        }),
        Err(e) => match local_pid {
            Some(pid) if process_exists(pid) => Ok(DaemonStatus::Unhealthy {
                pid,
                error: e.to_string(),
            }),
            Some(_) => {
                // Stale PID file
                let _ = std::fs::remove_file(&pid_file);
                Ok(DaemonStatus::Stopped)
            }
            None => Ok(DaemonStatus::Stopped),
        },
    }
}

/// Stop the daemon gracefully
pub async fn stop_daemon(force: bool, timeout_secs: u64) -> Result<()> {
    let pid_file = get_pid_file_path();

    let pid = std::fs::read_to_string(&pid_file)
        .context("Failed to read PID file")?
        .trim()
        .parse::<u32>()
        .context("Invalid PID")?;

    info!("Sending SIGTERM to process {}", pid);

    #[cfg(unix)]
    {
        send_signal(pid, libc::SIGTERM)?;

        for _ in 0..timeout_secs {
            if !process_exists(pid) {
                info!("Daemon stopped gracefully");
                let _ = std::fs::remove_file(&pid_file);
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }

        if force {
            warn!("Graceful shutdown timeout, sending SIGKILL");
            send_signal(pid, libc::SIGKILL)?;
            sleep(Duration::from_secs(1)).await;
        } else {
            anyhow::bail!("Daemon did not stop within timeout");
        }
    }

    #[cfg(windows)]
    {
        let _ = (force, timeout_secs);
        let output = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output()
            .context("Failed to execute taskkill")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("not found") {
                anyhow::bail!("Failed to stop daemon: {}", stderr);
            }
        }
        info!("Daemon stopped (killed via taskkill)");
    }

    let _ = std::fs::remove_file(&pid_file);
    Ok(())
}

fn get_pid_file_path() -> PathBuf {
    #[cfg(unix)]
    {
        let uid = unsafe { libc::geteuid() };
        if uid == 0 {
            PathBuf::from(PID_FILE)
        } else {
            PathBuf::from(PID_FILE_FALLBACK)
        }
    }

    #[cfg(windows)]
    {
        PathBuf::from("C:\\ProgramData\\vigil\\vigil.pid")
    }
}

fn process_exists(_pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(_pid as i32, 0) == 0 }
    }

    #[cfg(windows)]
    {
        true
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> Result<()> {
    unsafe {
        if libc::kill(pid as i32, signal) != 0 {
            anyhow::bail!("Failed to send signal {} to process {}", signal, pid);
        }
    }
    Ok(())
}

/// Write PID file
pub fn write_pid_file(pid: u32) -> Result<()> {
    let pid_file = get_pid_file_path();
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(&pid_file, pid.to_string())
        .with_context(|| format!("Failed to write PID file: {:?}", pid_file))?;
    info!("Wrote PID file: {:?}", pid_file);
    Ok(())
}

/// Remove PID file
pub fn remove_pid_file() -> Result<()> {
    let pid_file = get_pid_file_path();
    if pid_file.exists() {
        std::fs::remove_file(&pid_file)
            .with_context(|| format!("Failed to remove PID file: {:?}", pid_file))?;
        info!("Removed PID file: {:?}", pid_file);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_port_and_scheme() {
        assert_eq!(ClientTarget::new("127.0.0.1", None).base_url(), "http://127.0.0.1:8400");
        assert_eq!(
            ClientTarget::new("https://vigil.internal/", Some(443)).base_url(),
            "https://vigil.internal:443"
        );
    }

    #[tokio::test]
    async fn healthy_endpoint_reports_running() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"healthy","uptime_seconds":42,"queue_depth":3}"#)
            .create_async()
            .await;
        let url = server.url();
        let (host, port) = url.rsplit_once(':').unwrap();

        let target = ClientTarget::new(host, Some(port.parse().unwrap()));
        match check_daemon_running(&target).await.unwrap() {
            DaemonStatus::Running { uptime, queue_depth, .. } => {
                assert_eq!(uptime, Some(42));
                assert_eq!(queue_depth, Some(3));
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }
}
