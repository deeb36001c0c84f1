// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Incident Workflow State Machine
//!
//! Every task moves through a fixed finite state machine driven by the
//! workflow coordinator:
//!
//! ```text
//! Queued ──▶ Investigating ──┬──▶ RemediationKnown ──▶ Remediating ──▶ Verifying ──┬──▶ Resolved
//!                            │                                                     │
//!                            └──▶ RemediationUnknown ─────────────────────────────┴──▶ Escalated
//! ```
//!
//! Any non-terminal state may additionally move straight to `Escalated`
//! (agent failure, timeout, authorization denial or cancellation). Nothing
//! leaves `Resolved` or `Escalated`.
//!
//! The [`WorkflowProgress`] value accumulates the results each step hands to
//! the next one and is snapshotted into every checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::agent::{RemediationReport, RootCauseHypothesis};
use crate::domain::invocation::RecordId;
use crate::domain::knowledge::SopMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Investigating,
    RemediationKnown,
    RemediationUnknown,
    Remediating,
    Verifying,
    Resolved,
    Escalated,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::Queued,
        TaskState::Investigating,
        TaskState::RemediationKnown,
        TaskState::RemediationUnknown,
        TaskState::Remediating,
        TaskState::Verifying,
        TaskState::Resolved,
        TaskState::Escalated,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Resolved | TaskState::Escalated)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Resolved | Escalated, _) => false,
            (_, Escalated) => true,
            (Queued, Investigating) => true,
            (Investigating, RemediationKnown | RemediationUnknown) => true,
            (RemediationKnown, Remediating) => true,
            (Remediating, Verifying) => true,
            (Verifying, Resolved) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Investigating => "investigating",
            TaskState::RemediationKnown => "remediation_known",
            TaskState::RemediationUnknown => "remediation_unknown",
            TaskState::Remediating => "remediating",
            TaskState::Verifying => "verifying",
            TaskState::Resolved => "resolved",
            TaskState::Escalated => "escalated",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownState(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: TaskState, to: TaskState },

    #[error("Workflow path must start in queued, found {0}")]
    InvalidStart(TaskState),

    #[error("Unknown task state '{0}'")]
    UnknownState(String),
}

/// Check that `states` is a valid walk through the state machine starting
/// at `Queued`. Repeated states are rejected because no state loops.
pub fn validate_path(states: &[TaskState]) -> Result<(), WorkflowError> {
    match states.first() {
        None => return Ok(()),
        Some(TaskState::Queued) => {}
        Some(other) => return Err(WorkflowError::InvalidStart(*other)),
    }
    for pair in states.windows(2) {
        if !pair[0].can_transition_to(pair[1]) {
            return Err(WorkflowError::IllegalTransition { from: pair[0], to: pair[1] });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    NoKnownRemediation,
    AgentTimeout,
    AgentFailure,
    AgentRequestedEscalation,
    AuthorizationDenied,
    VerificationFailed,
    MissingRootCause,
    Cancelled,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::NoKnownRemediation => "no_known_remediation",
            EscalationKind::AgentTimeout => "agent_timeout",
            EscalationKind::AgentFailure => "agent_failure",
            EscalationKind::AgentRequestedEscalation => "agent_requested_escalation",
            EscalationKind::AuthorizationDenied => "authorization_denied",
            EscalationKind::VerificationFailed => "verification_failed",
            EscalationKind::MissingRootCause => "missing_root_cause",
            EscalationKind::Cancelled => "cancelled",
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            EscalationKind::NoKnownRemediation => "No known remediation matched the root cause",
            EscalationKind::AgentTimeout => "An agent did not answer before its deadline",
            EscalationKind::AgentFailure => "An agent failed while handling the task",
            EscalationKind::AgentRequestedEscalation => "An agent asked for human review",
            EscalationKind::AuthorizationDenied => "The execution gateway denied a remediation action",
            EscalationKind::VerificationFailed => "The remediation did not bring the signal back to baseline",
            EscalationKind::MissingRootCause => "Remediation was blocked because no root-cause record exists",
            EscalationKind::Cancelled => "The task was cancelled by an operator",
        }
    }
}

impl fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended up `Escalated`, written for the humans taking over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationReason {
    pub kind: EscalationKind,
    /// State the task was in when it escalated.
    pub failure_point: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    pub detail: String,
    pub escalated_at: DateTime<Utc>,
}

impl EscalationReason {
    pub fn new(
        kind: EscalationKind,
        failure_point: TaskState,
        root_cause: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            failure_point,
            root_cause,
            detail: detail.into(),
            escalated_at: Utc::now(),
        }
    }

    pub fn describe(&self) -> String {
        let root_cause = self
            .root_cause
            .as_deref()
            .unwrap_or("not determined");
        format!(
            "{} (while {}). Root cause: {}. Details: {}",
            self.kind.headline(),
            self.failure_point,
            root_cause,
            self.detail
        )
    }
}

/// Outcome of one verification probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub attempt: u32,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

/// Results accumulated across workflow steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCauseHypothesis>,
    /// Finalized Investigator record the root cause came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigator_record: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_sop: Option<SopMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification: Vec<VerificationCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReason>,
}

impl WorkflowProgress {
    pub fn root_cause_summary(&self) -> Option<String> {
        self.root_cause.as_ref().map(|rc| rc.summary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskState::*;

    #[test]
    fn happy_path_is_valid() {
        let path = [Queued, Investigating, RemediationKnown, Remediating, Verifying, Resolved];
        assert!(validate_path(&path).is_ok());
    }

    #[test]
    fn unknown_remediation_path_is_valid() {
        let path = [Queued, Investigating, RemediationUnknown, Escalated];
        assert!(validate_path(&path).is_ok());
    }

    #[test]
    fn skipping_investigation_is_rejected() {
        let path = [Queued, RemediationKnown];
        assert_eq!(
            validate_path(&path),
            Err(WorkflowError::IllegalTransition { from: Queued, to: RemediationKnown })
        );
    }

    #[test]
    fn unknown_remediation_cannot_remediate() {
        assert!(!RemediationUnknown.can_transition_to(Remediating));
        assert!(RemediationUnknown.can_transition_to(Escalated));
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for next in TaskState::ALL {
            assert!(!Resolved.can_transition_to(next));
            assert!(!Escalated.can_transition_to(next));
        }
    }

    #[test]
    fn path_must_start_queued() {
        assert_eq!(validate_path(&[Investigating]), Err(WorkflowError::InvalidStart(Investigating)));
    }

    #[test]
    fn state_names_round_trip_through_from_str() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("paused".parse::<TaskState>().is_err());
    }

    #[test]
    fn escalation_description_is_human_readable() {
        let reason = EscalationReason::new(
            EscalationKind::VerificationFailed,
            Verifying,
            Some("cpu saturation on checkout".into()),
            "cpu_usage stayed at 97.0 after 2 checks",
        );
        let text = reason.describe();
        assert!(text.contains("did not bring the signal back"));
        assert!(text.contains("verifying"));
        assert!(text.contains("cpu saturation on checkout"));
    }
}
