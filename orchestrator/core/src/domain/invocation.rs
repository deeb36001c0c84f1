// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Invocation Records
//!
//! One [`InvocationRecord`] is written per attempt at running an agent. It is
//! created when the attempt starts and finalized exactly once with its
//! outcome; after that it is never mutated.
//!
//! Attempts that belong to the same workflow step share an
//! [`InvocationKey`]. The key is derived deterministically from the task id
//! and the step name, so a worker that picks up a redelivered task computes
//! the same key and can find the already-finalized result instead of running
//! the agent (and its side effects) a second time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::{AgentOutcome, OutcomeReason};
use crate::domain::task::TaskId;

/// Namespace for deterministic invocation keys (UUIDv5).
const INVOCATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_9a2e_4b7d_5e30_8c41_d2a9_17b3_e605);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of one workflow step of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationKey(pub Uuid);

impl InvocationKey {
    pub fn for_step(task_id: TaskId, step: &str) -> Self {
        let name = format!("{}/{}", task_id, step);
        Self(Uuid::new_v5(&INVOCATION_NAMESPACE, name.as_bytes()))
    }

    /// Key for agent runs that are not tied to a task (scheduled agents).
    pub fn ad_hoc() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Sentinel,
    Investigator,
    Surgeon,
    Analyst,
    Clerk,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Sentinel => "sentinel",
            AgentRole::Investigator => "investigator",
            AgentRole::Surgeon => "surgeon",
            AgentRole::Analyst => "analyst",
            AgentRole::Clerk => "clerk",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentinel" => Ok(AgentRole::Sentinel),
            "investigator" => Ok(AgentRole::Investigator),
            "surgeon" => Ok(AgentRole::Surgeon),
            "analyst" => Ok(AgentRole::Analyst),
            "clerk" => Ok(AgentRole::Clerk),
            other => Err(format!("unknown agent role '{}'", other)),
        }
    }
}

/// Final result of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Completed { outcome: AgentOutcome },
    TimedOut { after_ms: u64 },
}

impl InvocationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            InvocationOutcome::Completed { outcome } => outcome.label(),
            InvocationOutcome::TimedOut { .. } => "timed_out",
        }
    }

    pub fn agent_outcome(&self) -> Option<&AgentOutcome> {
        match self {
            InvocationOutcome::Completed { outcome } => Some(outcome),
            InvocationOutcome::TimedOut { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&OutcomeReason> {
        self.agent_outcome().and_then(AgentOutcome::reason)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    #[error("Invocation record {0} is already finalized")]
    AlreadyFinalized(RecordId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: RecordId,
    pub invocation_key: InvocationKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub role: AgentRole,
    /// 1-based attempt number within the invocation key.
    pub attempt: u32,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InvocationOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl InvocationRecord {
    pub fn start(
        invocation_key: InvocationKey,
        task_id: Option<TaskId>,
        role: AgentRole,
        attempt: u32,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: RecordId::new(),
            invocation_key,
            task_id,
            role,
            attempt,
            input,
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn finalize(&mut self, outcome: InvocationOutcome) -> Result<(), InvocationError> {
        if self.is_finalized() {
            return Err(InvocationError::AlreadyFinalized(self.id));
        }
        let finished_at = Utc::now();
        let elapsed = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.outcome = Some(outcome);
        self.finished_at = Some(finished_at);
        self.duration_ms = Some(elapsed);
        Ok(())
    }

    /// Finalized with an agent answer (not a timeout). Only these results
    /// may be reused when the same step is re-run.
    pub fn is_reusable(&self) -> bool {
        matches!(self.outcome, Some(InvocationOutcome::Completed { .. }))
    }

    /// Finalized successful Investigator record, the only valid basis for a
    /// state-changing action.
    pub fn is_root_cause_record(&self) -> bool {
        self.role == AgentRole::Investigator
            && matches!(
                self.outcome,
                Some(InvocationOutcome::Completed { outcome: AgentOutcome::Success(_) })
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentOutcome, OutcomeReason};

    #[test]
    fn invocation_key_is_deterministic_per_step() {
        let task = TaskId::new();
        assert_eq!(InvocationKey::for_step(task, "investigate"), InvocationKey::for_step(task, "investigate"));
        assert_ne!(InvocationKey::for_step(task, "investigate"), InvocationKey::for_step(task, "remediate"));
        assert_ne!(
            InvocationKey::for_step(task, "investigate"),
            InvocationKey::for_step(TaskId::new(), "investigate")
        );
    }

    #[test]
    fn record_finalizes_once() {
        let mut record = InvocationRecord::start(
            InvocationKey::ad_hoc(),
            None,
            AgentRole::Analyst,
            1,
            serde_json::json!({}),
        );
        assert!(!record.is_finalized());
        record
            .finalize(InvocationOutcome::Completed {
                outcome: AgentOutcome::Failure(OutcomeReason::general("no data")),
            })
            .unwrap();
        assert!(record.is_finalized());
        assert!(record.duration_ms.is_some());
        let err = record.finalize(InvocationOutcome::TimedOut { after_ms: 10 }).unwrap_err();
        assert_eq!(err, InvocationError::AlreadyFinalized(record.id));
    }

    #[test]
    fn timed_out_records_are_not_reusable() {
        let mut record = InvocationRecord::start(
            InvocationKey::ad_hoc(),
            None,
            AgentRole::Investigator,
            1,
            serde_json::Value::Null,
        );
        record.finalize(InvocationOutcome::TimedOut { after_ms: 5 }).unwrap();
        assert!(!record.is_reusable());
        assert!(!record.is_root_cause_record());
    }
}
