// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::invocation::{AgentRole, InvocationKey, RecordId};
use crate::domain::knowledge::KnowledgeEntryId;
use crate::domain::task::{Priority, TaskId};
use crate::domain::workflow::{EscalationKind, TaskState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    TaskSubmitted {
        task_id: TaskId,
        trigger: String,
        priority: Priority,
        submitted_at: DateTime<Utc>,
    },
    TaskTransitioned {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
        sequence: u64,
        transitioned_at: DateTime<Utc>,
    },
    CancellationRequested {
        task_id: TaskId,
        reason: String,
        requested_at: DateTime<Utc>,
    },
    TaskResolved {
        task_id: TaskId,
        summary_entry: Option<KnowledgeEntryId>,
        resolved_at: DateTime<Utc>,
    },
    TaskEscalated {
        task_id: TaskId,
        kind: EscalationKind,
        failure_point: TaskState,
        reason: String,
        escalated_at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::TaskSubmitted { task_id, .. }
            | TaskEvent::TaskTransitioned { task_id, .. }
            | TaskEvent::CancellationRequested { task_id, .. }
            | TaskEvent::TaskResolved { task_id, .. }
            | TaskEvent::TaskEscalated { task_id, .. } => *task_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    InvocationStarted {
        record_id: RecordId,
        invocation_key: InvocationKey,
        task_id: Option<TaskId>,
        role: AgentRole,
        attempt: u32,
        started_at: DateTime<Utc>,
    },
    InvocationFinished {
        record_id: RecordId,
        task_id: Option<TaskId>,
        role: AgentRole,
        outcome: String,
        duration_ms: u64,
        finished_at: DateTime<Utc>,
    },
    InvocationReused {
        record_id: RecordId,
        task_id: Option<TaskId>,
        role: AgentRole,
        reused_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayEvent {
    ActionAuthorized {
        task_id: TaskId,
        root_cause_record: RecordId,
        action_type: String,
        target: String,
        authorized_at: DateTime<Utc>,
    },
    ActionDenied {
        task_id: TaskId,
        root_cause_record: Option<RecordId>,
        action_type: String,
        target: String,
        reason: String,
        denied_at: DateTime<Utc>,
    },
    ActionExecuted {
        task_id: TaskId,
        idempotency_key: String,
        action_type: String,
        deduplicated: bool,
        executed_at: DateTime<Utc>,
    },
    ActionFailed {
        task_id: TaskId,
        idempotency_key: String,
        action_type: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
}
