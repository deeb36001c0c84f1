// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Task Queue
//!
//! Rows in `task_queue` are claimed with `FOR UPDATE SKIP LOCKED`, so any
//! number of workers in any number of processes can dequeue concurrently
//! without handing the same visible message to two of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::queue::{Delivery, MessageId, QueueAck, QueueError, ReceiptHandle, TaskQueue};
use crate::domain::task::{Priority, TaskId};

/// Interval between claim attempts while a dequeue is waiting.
const POLL_STEP: Duration = Duration::from_millis(250);

pub struct PostgresTaskQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self { pool, visibility_timeout }
    }

    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let token = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            UPDATE task_queue SET
                receipt = $1,
                visible_at = NOW() + ($2::DOUBLE PRECISION * INTERVAL '1 second'),
                delivery_count = delivery_count + 1
            WHERE message_id = (
                SELECT message_id FROM task_queue
                WHERE visible_at <= NOW()
                ORDER BY priority DESC, enqueued_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING message_id, task_id, priority, enqueued_at, delivery_count
            "#,
        )
        .bind(token)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_id = MessageId(row.try_get("message_id")?);
        let rank: i16 = row.try_get("priority")?;
        let delivery_count: i32 = row.try_get("delivery_count")?;
        let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
        let priority = Priority::from_rank(rank)
            .ok_or_else(|| QueueError::Storage(format!("invalid priority rank {}", rank)))?;

        Ok(Some(Delivery {
            message_id,
            receipt: ReceiptHandle { message_id, token },
            task_id: TaskId(row.try_get("task_id")?),
            priority,
            delivery_count: delivery_count as u32,
            first_enqueued_at: enqueued_at,
        }))
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue(&self, task_id: TaskId, priority: Priority) -> Result<QueueAck, QueueError> {
        let message_id = MessageId::new();
        let enqueued_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO task_queue (message_id, task_id, priority, enqueued_at, visible_at, receipt, delivery_count)
            VALUES ($1, $2, $3, $4, $4, NULL, 0)
            "#,
        )
        .bind(message_id.0)
        .bind(task_id.0)
        .bind(priority.rank())
        .bind(enqueued_at)
        .execute(&self.pool)
        .await?;

        Ok(QueueAck { message_id, enqueued_at })
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE message_id = $1 AND receipt = $2")
            .bind(receipt.message_id.0)
            .bind(receipt.token)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(receipt.message_id));
        }
        Ok(())
    }

    async fn release(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue SET visible_at = NOW(), receipt = NULL WHERE message_id = $1 AND receipt = $2",
        )
        .bind(receipt.message_id.0)
        .bind(receipt.token)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(receipt.message_id));
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
