// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon runtime
//!
//! Assembles the orchestrator from configuration, starts the coordinator
//! workers and periodic agents, and serves the HTTP API until SIGINT or
//! SIGTERM. Shutdown cancels the workers and waits for them to finish.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_core::application::orchestrator::Orchestrator;
use vigil_core::domain::config::OrchestratorConfigManifest;
use vigil_core::infrastructure::metrics::install_prometheus_exporter;
use vigil_core::presentation::{router, ApiState};

use super::{remove_pid_file, write_pid_file};

const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn run_daemon(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<()> {
    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!("VIGIL daemon starting (PID: {})", pid);

    let manifest = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    manifest
        .validate()
        .context("Configuration validation failed")?;
    let spec = &manifest.spec;

    info!(
        name = %manifest.metadata.name,
        storage = ?spec.storage.backend,
        workers = spec.coordinator.workers,
        "Configuration loaded"
    );

    if spec.metrics.enabled {
        let addr: SocketAddr = format!("{}:{}", spec.api.bind_address, spec.metrics.port)
            .parse()
            .context("Invalid metrics listen address")?;
        install_prometheus_exporter(addr)?;
        info!("Prometheus metrics on {}", addr);
    }

    let orchestrator = Orchestrator::from_config(spec)
        .await
        .context("Failed to assemble orchestrator")?;

    let shutdown = CancellationToken::new();
    let workers = orchestrator.start(shutdown.clone());

    let app = router(ApiState::from_orchestrator(&orchestrator));
    let addr = format!("{}:{}", spec.api.bind_address, port_override.unwrap_or(spec.api.port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await;

    // Stop the workers even when the server failed
    shutdown.cancel();
    info!(workers = workers.len(), "Daemon shutting down, waiting for workers");
    let drained = tokio::time::timeout(WORKER_SHUTDOWN_GRACE, join_workers(workers)).await;
    if drained.is_err() {
        warn!("Workers did not stop within {:?}", WORKER_SHUTDOWN_GRACE);
    }

    served.context("HTTP server failed")?;
    info!("Daemon stopped");
    Ok(())
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
