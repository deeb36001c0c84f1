// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Capability
//!
//! Every specialized agent (Sentinel, Investigator, Surgeon, Analyst, Clerk)
//! implements the same [`Agent`] capability: `handle(context) -> outcome`.
//! The coordinator dispatches through a role-to-handler map held by the
//! agent pool; agents never call each other.
//!
//! Agents are stateless per invocation. Everything they need arrives in the
//! [`AgentContext`] and everything they produce leaves in the
//! [`AgentOutcome`]; persistence of the invocation record is the pool's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::execution::ActionResult;
use crate::domain::invocation::{AgentRole, InvocationKey, InvocationRecord};
use crate::domain::knowledge::{KnowledgeEntry, KnowledgeEntryId};
use crate::domain::repository::RepositoryError;
use crate::domain::task::{Task, TaskId};
use crate::domain::telemetry::HealthReport;
use crate::domain::workflow::WorkflowProgress;

/// Everything an agent may read for one invocation.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub invocation_key: InvocationKey,
    /// Absent for scheduled agents (Sentinel, Analyst).
    pub task: Option<Task>,
    /// Knowledge snapshot taken by the caller before the invocation.
    pub knowledge: Vec<KnowledgeEntry>,
    pub progress: WorkflowProgress,
    /// Invocation history of the task so far.
    pub history: Vec<InvocationRecord>,
}

impl AgentContext {
    pub fn for_task(invocation_key: InvocationKey, task: Task) -> Self {
        Self {
            invocation_key,
            task: Some(task),
            knowledge: Vec::new(),
            progress: WorkflowProgress::default(),
            history: Vec::new(),
        }
    }

    pub fn scheduled() -> Self {
        Self {
            invocation_key: InvocationKey::ad_hoc(),
            task: None,
            knowledge: Vec::new(),
            progress: WorkflowProgress::default(),
            history: Vec::new(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Vec<KnowledgeEntry>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_progress(mut self, progress: WorkflowProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_history(mut self, history: Vec<InvocationRecord>) -> Self {
        self.history = history;
        self
    }

    /// Serializable view of the context stored as the record input.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "task_id": self.task.as_ref().map(|t| t.id),
            "target": self.task.as_ref().map(|t| t.target.clone()),
            "knowledge_entries": self.knowledge.iter().map(|k| k.id).collect::<Vec<_>>(),
            "history_len": self.history.len(),
        })
    }
}

/// Machine-readable classification of a failure or escalation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    General,
    MissingContext,
    NoTelemetry,
    AuthorizationDenied,
    MissingRootCause,
    ActionFailed,
    VerificationFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReason {
    pub code: ReasonCode,
    pub message: String,
}

impl OutcomeReason {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ReasonCode::General, message)
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success(Artifact),
    Failure(OutcomeReason),
    NeedsEscalation(OutcomeReason),
}

impl AgentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AgentOutcome::Success(_) => "success",
            AgentOutcome::Failure(_) => "failure",
            AgentOutcome::NeedsEscalation(_) => "needs_escalation",
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            AgentOutcome::Success(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&OutcomeReason> {
        match self {
            AgentOutcome::Success(_) => None,
            AgentOutcome::Failure(reason) | AgentOutcome::NeedsEscalation(reason) => Some(reason),
        }
    }
}

/// Structured output of a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    RootCause(RootCauseHypothesis),
    Remediation(RemediationReport),
    /// Raw trigger payloads destined for the ingress.
    Triggers(Vec<serde_json::Value>),
    Findings(Vec<KnowledgeEntry>),
    IncidentSummary(IncidentSummary),
}

impl Artifact {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseHypothesis {
    pub summary: String,
    /// Canonical `<metric>:<target>` key SOPs can match exactly.
    pub signature: String,
    pub keywords: Vec<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub affected_scope: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationReport {
    pub sop_id: KnowledgeEntryId,
    pub sop_title: String,
    pub actions: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentSummary {
    pub task_id: TaskId,
    pub knowledge_entry_id: KnowledgeEntryId,
    pub title: String,
    pub body: String,
    /// Channels the summary was handed to. Delivery happens in the
    /// background and failures are only logged.
    pub dispatched_channels: Vec<String>,
}

/// Common capability of every agent role.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn handle(&self, context: &AgentContext) -> AgentOutcome;
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {role} timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        role: AgentRole,
        attempts: u32,
        timeout: Duration,
    },

    #[error("No agent registered for role {0}")]
    NotRegistered(AgentRole),

    #[error("Invocation store error: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_and_reasons() {
        let failure = AgentOutcome::Failure(OutcomeReason::new(ReasonCode::NoTelemetry, "no metrics"));
        assert_eq!(failure.label(), "failure");
        assert_eq!(failure.reason().unwrap().code, ReasonCode::NoTelemetry);
        assert!(failure.artifact().is_none());

        let success = AgentOutcome::Success(Artifact::Triggers(vec![]));
        assert_eq!(success.label(), "success");
        assert!(success.reason().is_none());
    }

    #[test]
    fn outcome_serializes_with_tags() {
        let outcome = AgentOutcome::NeedsEscalation(OutcomeReason::general("operator needed"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "needs_escalation");
        assert_eq!(json["value"]["message"], "operator needed");
        let back: AgentOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }
}
