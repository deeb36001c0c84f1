// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Queue Port
//!
//! Durable at-least-once buffer between the ingress and the coordinator
//! workers. A message stays in the queue until it is acknowledged; a
//! delivery that is neither acked nor released becomes visible again once
//! its visibility timeout elapses, with `delivery_count` incremented.
//!
//! Ordering is best effort: highest [`Priority`](crate::domain::task::Priority)
//! first, then oldest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::{Priority, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one delivery of a message. A stale receipt (from a delivery
/// whose visibility timeout already elapsed) is rejected by `ack`/`release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle {
    pub message_id: MessageId,
    pub token: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAck {
    pub message_id: MessageId,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    pub task_id: TaskId,
    pub priority: Priority,
    /// 1 on first delivery.
    pub delivery_count: u32,
    pub first_enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Receipt for message {0} is no longer valid")]
    StaleReceipt(MessageId),

    #[error("Queue storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Durably store a message for `task_id`. Returns once stored.
    async fn enqueue(&self, task_id: TaskId, priority: Priority) -> Result<QueueAck, QueueError>;

    /// Take the next visible message, waiting up to `wait` for one.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove the message for good.
    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Make the message visible again immediately.
    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Messages not yet acknowledged (visible or in flight).
    async fn depth(&self) -> Result<usize, QueueError>;
}
