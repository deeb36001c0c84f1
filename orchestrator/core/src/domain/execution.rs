// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # State-Changing Actions
//!
//! An [`ActionDescriptor`] names one SOP step to be run against the
//! infrastructure. Descriptors are only ever executed by the secure execution
//! gateway, which hands authorized ones to an [`ActionExecutor`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::invocation::{InvocationKey, RecordId};
use crate::domain::task::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub task_id: TaskId,
    /// Finalized Investigator record justifying the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause_record: Option<RecordId>,
    /// Invocation key of the Surgeon step issuing the action.
    pub invocation_key: InvocationKey,
    /// Position of the step within the SOP procedure.
    pub step_index: u32,
    pub action_type: String,
    pub target: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ActionDescriptor {
    /// `(invocation_key, step_index)`: a re-run Surgeon step produces the same key.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.invocation_key, self.step_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub idempotency_key: String,
    pub action_type: String,
    pub target: String,
    #[serde(default)]
    pub output: serde_json::Value,
    /// True when the gateway returned a previously executed result.
    #[serde(default)]
    pub deduplicated: bool,
    pub executed_at: DateTime<Utc>,
}

/// What an executor reports back for an action it ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("Action rejected by automation endpoint: {0}")]
    Rejected(String),

    #[error("Automation endpoint unreachable: {0}")]
    Transport(String),
}

/// Performs authorized actions against the infrastructure.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionDescriptor) -> Result<ActionOutput, ExecutorError>;
}

/// Gateway verdict on one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GatewayDecision {
    Executed { result: ActionResult },
    Deduplicated { result: ActionResult },
    Denied { reason: String },
    Failed { reason: String },
}

impl GatewayDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GatewayDecision::Executed { .. } => "executed",
            GatewayDecision::Deduplicated { .. } => "deduplicated",
            GatewayDecision::Denied { .. } => "denied",
            GatewayDecision::Failed { .. } => "failed",
        }
    }
}

/// One line of the gateway audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAuditEntry {
    pub id: uuid::Uuid,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause_record: Option<RecordId>,
    pub idempotency_key: String,
    pub action_type: String,
    pub target: String,
    pub scope: String,
    #[serde(flatten)]
    pub decision: GatewayDecision,
    pub decided_at: DateTime<Utc>,
}

impl GatewayAuditEntry {
    pub fn new(action: &ActionDescriptor, scope: &str, decision: GatewayDecision) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            task_id: action.task_id,
            root_cause_record: action.root_cause_record,
            idempotency_key: action.idempotency_key(),
            action_type: action.action_type.clone(),
            target: action.target.clone(),
            scope: scope.to_string(),
            decision,
            decided_at: Utc::now(),
        }
    }

    /// Result of an action that actually ran, if this entry records one.
    pub fn executed_result(&self) -> Option<&ActionResult> {
        match &self.decision {
            GatewayDecision::Executed { result } => Some(result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_combines_invocation_and_step() {
        let key = InvocationKey::for_step(TaskId::new(), "remediate");
        let action = ActionDescriptor {
            task_id: TaskId::new(),
            root_cause_record: None,
            invocation_key: key,
            step_index: 2,
            action_type: "service.restart".into(),
            target: "checkout".into(),
            parameters: serde_json::Value::Null,
        };
        assert_eq!(action.idempotency_key(), format!("{}:2", key));
    }
}
