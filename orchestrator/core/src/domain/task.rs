// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A [`Task`] is one incident or event processed end-to-end by the
//! coordinator. It is created by the ingress from a normalized trigger and
//! from then on its `status` is written only by the coordinator that holds
//! the task's lease.
//!
//! | Type | Role |
//! |------|------|
//! | [`TaskId`] | UUID newtype |
//! | [`TriggerSource`] | Where the task came from (alert, schedule, API) |
//! | [`Priority`] | Queue ordering hint derived from trigger severity |
//! | [`Signal`] | Triggering metric re-queried during verification |
//! | [`CancellationRequest`] | Operator request honoured between steps |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::workflow::{EscalationReason, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Queue priority. Ordering is `Low < Normal < High < Urgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Numeric rank used by storage backends that order in SQL.
    pub fn rank(&self) -> i16 {
        match self {
            Priority::Low => 1,
            Priority::Normal => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Priority> {
        match rank {
            1 => Some(Priority::Low),
            2 => Some(Priority::Normal),
            3 => Some(Priority::High),
            4 => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Alert severity as reported by the monitoring system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// The next lower severity, if any.
    pub fn below(&self) -> Option<Severity> {
        match self {
            Severity::Info => None,
            Severity::Warning => Some(Severity::Info),
            Severity::Error => Some(Severity::Warning),
            Severity::Critical => Some(Severity::Error),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "crit" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Alert,
    Schedule,
    Api,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Alert => "alert",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Api => "api",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized origin of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    Alert {
        source: String,
        alert_name: String,
        severity: Severity,
    },
    Schedule {
        job: String,
    },
    Api {
        submitted_by: String,
    },
}

impl TriggerSource {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSource::Alert { .. } => TriggerKind::Alert,
            TriggerSource::Schedule { .. } => TriggerKind::Schedule,
            TriggerSource::Api { .. } => TriggerKind::Api,
        }
    }

    /// Short human label, e.g. `alert:HighCpu` or `schedule:nightly-audit`.
    pub fn label(&self) -> String {
        match self {
            TriggerSource::Alert { alert_name, .. } => format!("alert:{}", alert_name),
            TriggerSource::Schedule { job } => format!("schedule:{}", job),
            TriggerSource::Api { submitted_by } => format!("api:{}", submitted_by),
        }
    }
}

/// The metric that fired the trigger, re-queried to confirm resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub metric: String,
    /// Values at or below the threshold count as back to baseline.
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// Task aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub trigger: TriggerSource,
    /// Service or host the task is about.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    /// Free-form trigger context carried to the agents.
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        trigger: TriggerSource,
        target: impl Into<String>,
        signal: Option<Signal>,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            trigger,
            target: target.into(),
            signal,
            payload,
            priority,
            status: TaskState::Queued,
            cancellation: None,
            escalation: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_some()
    }

    /// Apply a coordinator-validated status change.
    pub(crate) fn apply_status(&mut self, status: TaskState, escalation: Option<EscalationReason>) {
        let now = Utc::now();
        self.status = status;
        if escalation.is_some() {
            self.escalation = escalation;
        }
        self.updated_at = now;
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
    }

    /// Words describing the task, used to query the knowledge store.
    pub fn keywords(&self) -> Vec<String> {
        let mut words = vec![self.target.clone()];
        match &self.trigger {
            TriggerSource::Alert { alert_name, .. } => words.push(alert_name.clone()),
            TriggerSource::Schedule { job } => words.push(job.clone()),
            TriggerSource::Api { .. } => {}
        }
        if let Some(signal) = &self.signal {
            words.push(signal.metric.clone());
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_urgent_highest() {
        let mut priorities = vec![Priority::Normal, Priority::Urgent, Priority::Low, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Low, Priority::Normal, Priority::High, Priority::Urgent]
        );
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("sometimes".parse::<Priority>().is_err());
    }

    #[test]
    fn severity_parses_aliases() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("crit".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(Severity::Critical.below(), Some(Severity::Error));
        assert_eq!(Severity::Info.below(), None);
    }

    #[test]
    fn new_task_starts_queued() {
        let task = Task::new(
            TriggerSource::Schedule { job: "nightly".into() },
            "checkout",
            None,
            serde_json::json!({}),
            Priority::Low,
        );
        assert_eq!(task.status, TaskState::Queued);
        assert!(!task.is_terminal());
        assert_eq!(task.trigger.label(), "schedule:nightly");
        assert_eq!(task.keywords(), vec!["checkout".to_string(), "nightly".to_string()]);
    }
}
