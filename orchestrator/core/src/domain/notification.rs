// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stakeholder notification port. Callers treat delivery as fire-and-forget:
//! a failure is logged, never propagated into the workflow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::task::TaskId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub task_id: TaskId,
    pub subject: String,
    pub body: String,
    /// Final task state, e.g. `resolved`.
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Notification rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &NotificationMessage) -> Result<(), NotificationError>;
}
