// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use vigil_core::domain::config::{
    ExecutorConfig, HealthProbeConfig, OrchestratorConfigManifest, StorageKind, TelemetryConfig,
};

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./vigil-config.yaml)
        #[arg(short, long, default_value = "./vigil-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples, force } => generate(&output, examples, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. VIGIL_CONFIG_PATH: {}",
            std::env::var("VIGIL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./vigil-config.yaml");
        println!("  4. ~/.vigil/config.yaml");
        println!("  5. /etc/vigil/config.yaml");
        println!();
    }

    let manifest = OrchestratorConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;

    if as_yaml {
        print!("{}", serde_yaml::to_string(&manifest).context("Failed to render configuration")?);
        return Ok(());
    }

    let spec = &manifest.spec;
    println!("{} {}", "Configuration:".bold(), manifest.metadata.name);
    println!();

    println!("{}", "Runtime:".bold());
    println!("  API: {}:{}", spec.api.bind_address, spec.api.port);
    if spec.metrics.enabled {
        println!("  Metrics: {}:{}", spec.api.bind_address, spec.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!("  Log: {} ({})", spec.settings.log_level, spec.settings.log_format);
    match spec.storage.backend {
        StorageKind::InMemory => println!("  Storage: in-memory {}", "(state is lost on restart)".yellow()),
        StorageKind::Postgres => println!("  Storage: postgres"),
    }
    println!();

    println!("{}", "Workflow:".bold());
    println!("  Workers: {}", spec.coordinator.workers);
    println!("  Lease TTL: {:?}", spec.coordinator.lease_ttl);
    println!("  SOP match threshold: {:.2}", spec.coordinator.sop_match_threshold);
    println!(
        "  Agent timeout: {:?} ({} retries)",
        spec.agents.invocation_timeout, spec.agents.max_timeout_retries
    );
    println!(
        "  Verification: {} checks every {:?} within {:?}",
        spec.verification.max_attempts, spec.verification.poll_interval, spec.verification.wait_window
    );
    println!("  Queue visibility timeout: {:?}", spec.queue.visibility_timeout);
    println!();

    println!("{}", "Adapters:".bold());
    match &spec.telemetry {
        TelemetryConfig::Prometheus { endpoint, .. } => println!("  Telemetry: prometheus at {}", endpoint),
        TelemetryConfig::Static { metrics, .. } => {
            println!("  Telemetry: static ({} series)", metrics.len())
        }
    }
    match &spec.health_probe {
        HealthProbeConfig::Telemetry { .. } => println!("  Health probe: telemetry baseline"),
        HealthProbeConfig::Http { url_template, .. } => println!("  Health probe: {}", url_template),
    }
    match &spec.gateway.executor {
        ExecutorConfig::DryRun => println!("  Executor: {}", "dry-run".yellow()),
        ExecutorConfig::Http { endpoint, .. } => println!("  Executor: {}", endpoint),
    }
    println!("  Policy rules: {}", spec.gateway.policy.rules.len());
    for rule in &spec.gateway.policy.rules {
        println!("    - {} → {}", rule.action_pattern, rule.allowed_scopes.join(", "));
    }
    let channels: Vec<&str> = spec.notifications.channels.iter().map(|c| c.name.as_str()).collect();
    println!("  Notification channels: {}", channels.join(", "));
    println!();

    println!("{}", "Periodic agents:".bold());
    println!(
        "  Sentinel: {} ({} rules every {:?})",
        enabled_label(spec.sentinel.enabled),
        spec.sentinel.rules.len(),
        spec.sentinel.interval
    );
    println!(
        "  Analyst: {} ({} series every {:?})",
        enabled_label(spec.analyst.enabled),
        spec.analyst.series.len(),
        spec.analyst.interval
    );

    Ok(())
}

fn enabled_label(enabled: bool) -> colored::ColoredString {
    if enabled {
        "enabled".green()
    } else {
        "disabled".dimmed()
    }
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let manifest = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    manifest.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: &Path, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let sample = if with_examples { EXAMPLES_TEMPLATE } else { MINIMAL_TEMPLATE };

    std::fs::write(output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_templates_are_valid_manifests() {
        for template in [MINIMAL_TEMPLATE, EXAMPLES_TEMPLATE] {
            let manifest = OrchestratorConfigManifest::from_yaml_str(template).unwrap();
            manifest.validate().unwrap();
        }
    }

    #[test]
    fn generate_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil-config.yaml");

        generate(&path, true, false).unwrap();
        assert!(generate(&path, false, false).is_err());
        generate(&path, false, true).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, MINIMAL_TEMPLATE);
    }
}
