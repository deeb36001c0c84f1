// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Checkpoints
//!
//! A checkpoint is an immutable snapshot of a task's workflow position. A new
//! checkpoint supersedes the previous one; the active checkpoint of a task is
//! always the one with the highest `sequence`. Sequences are dense
//! (`0, 1, 2, ...`) so a store can reject a concurrent writer by checking
//! `sequence == last + 1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::invocation::RecordId;
use crate::domain::task::TaskId;
use crate::domain::workflow::{TaskState, WorkflowError, WorkflowProgress};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: TaskId,
    pub sequence: u64,
    /// State before the transition; `None` for the initial checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TaskState>,
    pub state: TaskState,
    /// Invocation record whose output caused the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<RecordId>,
    /// Snapshot of the causing agent output.
    #[serde(default)]
    pub output: serde_json::Value,
    pub progress: WorkflowProgress,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    /// The first checkpoint of a task, written when a worker first pulls it.
    pub fn initial(task_id: TaskId) -> Self {
        Self {
            task_id,
            sequence: 0,
            from: None,
            state: TaskState::Queued,
            cause: None,
            output: serde_json::Value::Null,
            progress: WorkflowProgress::default(),
            written_at: Utc::now(),
        }
    }

    /// Build the checkpoint that records `self.state -> state`.
    pub fn advance(
        &self,
        state: TaskState,
        cause: Option<RecordId>,
        output: serde_json::Value,
        progress: WorkflowProgress,
    ) -> Result<Checkpoint, WorkflowError> {
        if !self.state.can_transition_to(state) {
            return Err(WorkflowError::IllegalTransition { from: self.state, to: state });
        }
        Ok(Checkpoint {
            task_id: self.task_id,
            sequence: self.sequence + 1,
            from: Some(self.state),
            state,
            cause,
            output,
            progress,
            written_at: Utc::now(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
