// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task inspection commands
//!
//! Commands: list, status, checkpoints, invocations, actions, cancel

use anyhow::Result;
use clap::Subcommand;
use colored::{ColoredString, Colorize};

use vigil_core::domain::execution::GatewayDecision;
use vigil_core::domain::task::TaskId;
use vigil_core::domain::workflow::TaskState;

use crate::daemon::{ClientTarget, DaemonClient};

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List recent tasks
    List {
        /// Only tasks in this state (e.g. escalated)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a task and its latest checkpoint
    Status {
        #[arg(value_name = "TASK_ID")]
        task_id: TaskId,
    },

    /// Show the full checkpoint log of a task
    Checkpoints {
        #[arg(value_name = "TASK_ID")]
        task_id: TaskId,
    },

    /// Show the agent invocations of a task
    Invocations {
        #[arg(value_name = "TASK_ID")]
        task_id: TaskId,
    },

    /// Show the execution gateway audit trail of a task
    Actions {
        #[arg(value_name = "TASK_ID")]
        task_id: TaskId,
    },

    /// Request cancellation of a live task
    Cancel {
        #[arg(value_name = "TASK_ID")]
        task_id: TaskId,

        /// Reason recorded on the escalation
        #[arg(short, long)]
        reason: Option<String>,
    },
}

pub async fn handle_command(command: TaskCommand, target: ClientTarget) -> Result<()> {
    let client = DaemonClient::new(&target)?;
    match command {
        TaskCommand::List { status, limit } => list(&client, status.as_deref(), limit).await,
        TaskCommand::Status { task_id } => status(&client, task_id).await,
        TaskCommand::Checkpoints { task_id } => checkpoints(&client, task_id).await,
        TaskCommand::Invocations { task_id } => invocations(&client, task_id).await,
        TaskCommand::Actions { task_id } => actions(&client, task_id).await,
        TaskCommand::Cancel { task_id, reason } => cancel(&client, task_id, reason).await,
    }
}

fn paint_state(state: TaskState) -> ColoredString {
    let label = state.as_str();
    match state {
        TaskState::Resolved => label.green(),
        TaskState::Escalated => label.red(),
        TaskState::Queued => label.dimmed(),
        _ => label.yellow(),
    }
}

async fn list(client: &DaemonClient, status: Option<&str>, limit: usize) -> Result<()> {
    let tasks = client.list_tasks(status, limit).await?;
    if tasks.is_empty() {
        println!("{}", "No tasks found".yellow());
        return Ok(());
    }

    println!(
        "{:<36}  {:<18}  {:<8}  {:<20}  {}",
        "ID".bold(),
        "STATE".bold(),
        "PRIORITY".bold(),
        "TARGET".bold(),
        "TRIGGER".bold()
    );
    for task in tasks {
        println!(
            "{:<36}  {:<18}  {:<8}  {:<20}  {}",
            task.id,
            paint_state(task.status),
            task.priority,
            task.target,
            task.trigger.label()
        );
    }
    Ok(())
}

async fn status(client: &DaemonClient, task_id: TaskId) -> Result<()> {
    let view = client.get_task(task_id).await?;
    let task = &view.task;

    println!("{} {}", "Task".bold(), task.id);
    println!("  State: {}", paint_state(task.status));
    println!("  Target: {}", task.target);
    println!("  Trigger: {}", task.trigger.label());
    println!("  Priority: {}", task.priority);
    if let Some(signal) = &task.signal {
        match signal.observed {
            Some(observed) => println!(
                "  Signal: {} = {:.2} (threshold {:.2})",
                signal.metric, observed, signal.threshold
            ),
            None => println!("  Signal: {} (threshold {:.2})", signal.metric, signal.threshold),
        }
    }
    println!("  Created: {}", task.created_at);
    if let Some(finished) = task.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(cancellation) = &task.cancellation {
        println!("  Cancellation requested: {}", cancellation.reason.yellow());
    }

    if let Some(summary) = &view.escalation_summary {
        println!();
        println!("{}", "Escalation".red().bold());
        println!("  {}", summary);
    }

    if let Some(checkpoint) = &view.latest_checkpoint {
        let progress = &checkpoint.progress;
        println!();
        println!("{} (sequence {})", "Latest checkpoint".bold(), checkpoint.sequence);
        if let Some(root_cause) = &progress.root_cause {
            println!(
                "  Root cause: {} [{}] confidence {:.0}%",
                root_cause.summary,
                root_cause.signature,
                root_cause.confidence * 100.0
            );
        }
        if let Some(sop) = &progress.matched_sop {
            println!("  SOP: {} (score {:.2})", sop.title, sop.score);
        }
        if let Some(remediation) = &progress.remediation {
            println!("  Actions applied: {}", remediation.actions.len());
        }
        for check in &progress.verification {
            let verdict = if check.healthy { "healthy".green() } else { "unhealthy".red() };
            println!("  Check {}: {} - {}", check.attempt, verdict, check.detail);
        }
    }
    Ok(())
}

async fn checkpoints(client: &DaemonClient, task_id: TaskId) -> Result<()> {
    let checkpoints = client.checkpoints(task_id).await?;
    if checkpoints.is_empty() {
        println!("{}", "No checkpoints yet (task not picked up)".yellow());
        return Ok(());
    }
    for checkpoint in checkpoints {
        let from = checkpoint
            .from
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let cause = checkpoint
            .cause
            .map(|c| format!(" cause={}", c))
            .unwrap_or_default();
        println!(
            "{} {:>3}  {} -> {}{}",
            format!("[{}]", checkpoint.written_at).dimmed(),
            checkpoint.sequence,
            from,
            paint_state(checkpoint.state),
            cause.dimmed()
        );
    }
    Ok(())
}

async fn invocations(client: &DaemonClient, task_id: TaskId) -> Result<()> {
    let records = client.invocations(task_id).await?;
    if records.is_empty() {
        println!("{}", "No agent invocations".yellow());
        return Ok(());
    }
    for record in records {
        let outcome = match &record.outcome {
            Some(outcome) => {
                let label = outcome.label();
                match label {
                    "success" => label.green(),
                    "timed_out" | "failure" => label.red(),
                    _ => label.yellow(),
                }
            }
            None => "running".dimmed(),
        };
        let duration = record
            .duration_ms
            .map(|ms| format!(" {}ms", ms))
            .unwrap_or_default();
        println!(
            "{} {:<12} attempt {}  {}{}",
            format!("[{}]", record.started_at).dimmed(),
            record.role.to_string().bold(),
            record.attempt,
            outcome,
            duration
        );
        if let Some(reason) = record.outcome.as_ref().and_then(|o| o.failure_reason()) {
            println!("    {}", reason);
        }
    }
    Ok(())
}

async fn actions(client: &DaemonClient, task_id: TaskId) -> Result<()> {
    let entries = client.actions(task_id).await?;
    if entries.is_empty() {
        println!("{}", "No gateway actions".yellow());
        return Ok(());
    }
    for entry in entries {
        let (verdict, detail) = match &entry.decision {
            GatewayDecision::Executed { result } => ("executed".green(), result.idempotency_key.clone()),
            GatewayDecision::Deduplicated { result } => ("deduplicated".cyan(), result.idempotency_key.clone()),
            GatewayDecision::Denied { reason } => ("denied".red(), reason.clone()),
            GatewayDecision::Failed { reason } => ("failed".red(), reason.clone()),
        };
        println!(
            "{} {} {} on {} [{}] {}",
            format!("[{}]", entry.decided_at).dimmed(),
            verdict,
            entry.action_type.bold(),
            entry.target,
            entry.scope,
            detail
        );
    }
    Ok(())
}

async fn cancel(client: &DaemonClient, task_id: TaskId, reason: Option<String>) -> Result<()> {
    let task = client.cancel_task(task_id, reason).await?;
    println!("{}", format!("✓ Cancellation requested for {}", task.id).green());
    println!("  Current state: {}", paint_state(task.status));
    println!("  The task escalates at its next step boundary.");
    Ok(())
}
