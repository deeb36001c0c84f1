// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task Queue Implementations
//!
//! - [`InMemoryTaskQueue`]: single-process queue, workers are woken through a
//!   tokio `Notify` when a message is enqueued or released.
//! - [`PostgresTaskQueue`]: shared queue for several daemon processes, claims
//!   rows with `FOR UPDATE SKIP LOCKED`.
//!
//! Both hide a delivered message for the visibility timeout. A message that
//! is not acked or released in time is handed out again with a new receipt
//! and an incremented `delivery_count`; the old receipt turns stale.

pub mod postgres;

pub use postgres::PostgresTaskQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::domain::queue::{Delivery, MessageId, QueueAck, QueueError, ReceiptHandle, TaskQueue};
use crate::domain::task::{Priority, TaskId};

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: MessageId,
    task_id: TaskId,
    priority: Priority,
    enqueued_at: DateTime<Utc>,
    /// Sequence number breaking ties between equal timestamps.
    order: u64,
    /// `None` while visible.
    invisible_until: Option<Instant>,
    receipt: Option<Uuid>,
    delivery_count: u32,
}

impl QueuedMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map(|until| until <= now).unwrap_or(true)
    }
}

#[derive(Default)]
struct QueueState {
    messages: HashMap<MessageId, QueuedMessage>,
    next_order: u64,
}

#[derive(Clone)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    fn try_take(&self) -> Option<Delivery> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let message = state
            .messages
            .values_mut()
            .filter(|m| m.is_visible(now))
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.order.cmp(&a.order)))?;

        let token = Uuid::new_v4();
        message.receipt = Some(token);
        message.invisible_until = Some(now + self.visibility_timeout);
        message.delivery_count += 1;

        Some(Delivery {
            message_id: message.id,
            receipt: ReceiptHandle { message_id: message.id, token },
            task_id: message.task_id,
            priority: message.priority,
            delivery_count: message.delivery_count,
            first_enqueued_at: message.enqueued_at,
        })
    }

    /// Earliest moment an in-flight message becomes visible again.
    fn next_visibility(&self) -> Option<Instant> {
        self.state
            .lock()
            .messages
            .values()
            .filter_map(|m| m.invisible_until)
            .min()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task_id: TaskId, priority: Priority) -> Result<QueueAck, QueueError> {
        let id = MessageId::new();
        let enqueued_at = Utc::now();
        {
            let mut state = self.state.lock();
            let order = state.next_order;
            state.next_order += 1;
            state.messages.insert(
                id,
                QueuedMessage {
                    id,
                    task_id,
                    priority,
                    enqueued_at,
                    order,
                    invisible_until: None,
                    receipt: None,
                    delivery_count: 0,
                },
            );
        }
        debug!(message_id = %id, task_id = %task_id, priority = %priority, "Message enqueued");
        self.notify.notify_one();
        Ok(QueueAck { message_id: id, enqueued_at })
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take() {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = self
                .next_visibility()
                .filter(|at| *at > now)
                .map(|at| at.min(deadline))
                .unwrap_or(deadline);

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let current = state
            .messages
            .get(&receipt.message_id)
            .map(|m| m.receipt == Some(receipt.token))
            .unwrap_or(false);
        if !current {
            return Err(QueueError::StaleReceipt(receipt.message_id));
        }
        state.messages.remove(&receipt.message_id);
        Ok(())
    }

    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            match state.messages.get_mut(&receipt.message_id) {
                Some(m) if m.receipt == Some(receipt.token) => {
                    m.receipt = None;
                    m.invisible_until = None;
                }
                _ => return Err(QueueError::StaleReceipt(receipt.message_id)),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().messages.len())
    }
}
