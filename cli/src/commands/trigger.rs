// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Trigger submission
//!
//! `vigil trigger --file alert.json` forwards a raw payload as-is;
//! `vigil trigger --target checkout --metric cpu_usage --threshold 80`
//! builds an `api` trigger from flags.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::daemon::{ClientTarget, DaemonClient};

#[derive(Args, Debug, Default)]
pub struct TriggerArgs {
    /// Raw trigger payload (JSON or YAML, `-` for stdin)
    #[arg(short, long, value_name = "FILE", conflicts_with = "target")]
    pub file: Option<PathBuf>,

    /// Service or host the task is about
    #[arg(long, required_unless_present = "file")]
    pub target: Option<String>,

    /// Queue priority (low, normal, high, urgent)
    #[arg(long)]
    pub priority: Option<String>,

    /// Metric that signals the problem
    #[arg(long, requires = "threshold")]
    pub metric: Option<String>,

    /// Healthy upper bound for the metric
    #[arg(long, requires = "metric")]
    pub threshold: Option<f64>,

    /// Observed metric value
    #[arg(long, requires = "metric")]
    pub value: Option<f64>,

    /// Free-form description for the agents
    #[arg(long)]
    pub description: Option<String>,

    /// Submitter recorded on the task (default: $USER)
    #[arg(long, env = "USER", default_value = "operator")]
    pub submitted_by: String,
}

pub async fn handle_command(args: TriggerArgs, target: ClientTarget) -> Result<()> {
    let trigger = match &args.file {
        Some(path) => read_payload(path)?,
        None => build_trigger(&args)?,
    };

    let client = DaemonClient::new(&target)?;
    let ack = client.submit_trigger(&trigger).await?;

    println!("{}", "✓ Trigger accepted".green());
    println!("  Task ID: {}", ack.task_id.to_string().bold());
    println!("  Priority: {}", ack.priority);
    println!("  Message: {}", ack.message_id);
    println!("Follow it with: vigil task status {}", ack.task_id);
    Ok(())
}

fn read_payload(path: &Path) -> Result<Value> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read trigger from stdin")?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read trigger file {:?}", path))?
    };
    // YAML is a superset of JSON
    serde_yaml::from_str(&raw).context("Trigger payload is neither JSON nor YAML")
}

pub fn build_trigger(args: &TriggerArgs) -> Result<Value> {
    let target = args
        .target
        .as_deref()
        .context("--target is required without --file")?;

    let mut trigger = Map::new();
    trigger.insert("type".into(), json!("api"));
    trigger.insert("submitted_by".into(), json!(args.submitted_by));
    trigger.insert("target".into(), json!(target));
    if let Some(priority) = &args.priority {
        trigger.insert("priority".into(), json!(priority));
    }
    if let Some(metric) = &args.metric {
        trigger.insert("metric".into(), json!(metric));
    }
    if let Some(threshold) = args.threshold {
        trigger.insert("threshold".into(), json!(threshold));
    }
    if let Some(value) = args.value {
        trigger.insert("value".into(), json!(value));
    }
    if let Some(description) = &args.description {
        trigger.insert("description".into(), json!(description));
    }
    Ok(Value::Object(trigger))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_build_an_api_trigger() {
        let args = TriggerArgs {
            target: Some("checkout".into()),
            priority: Some("high".into()),
            metric: Some("cpu_usage".into()),
            threshold: Some(80.0),
            value: Some(97.5),
            submitted_by: "alice".into(),
            ..TriggerArgs::default()
        };
        let trigger = build_trigger(&args).unwrap();
        assert_eq!(trigger["type"], "api");
        assert_eq!(trigger["submitted_by"], "alice");
        assert_eq!(trigger["target"], "checkout");
        assert_eq!(trigger["threshold"], 80.0);
        assert_eq!(trigger["value"], 97.5);
        assert!(trigger.get("description").is_none());
    }

    #[test]
    fn yaml_payload_files_are_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "type: alert\nsource: alertmanager\nalert_name: HighCpu\ntarget: checkout\nseverity: critical"
        )
        .unwrap();
        let payload = read_payload(file.path()).unwrap();
        assert_eq!(payload["alert_name"], "HighCpu");
        assert_eq!(payload["severity"], "critical");
    }
}
