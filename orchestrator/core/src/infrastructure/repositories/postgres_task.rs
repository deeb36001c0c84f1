// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Task Repository
//!
//! Persists the `Task` aggregate in the `tasks` table. Status updates and
//! cancellation requests are separate column-level `UPDATE`s so neither can
//! overwrite the other.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::task::{CancellationRequest, Task, TaskId};
use crate::domain::workflow::{EscalationReason, TaskState};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = "id, trigger, target, signal, payload, priority, status, cancellation, escalation, \
                            created_at, updated_at, finished_at";

fn task_from_row(row: &PgRow) -> Result<Task, RepositoryError> {
    let priority: String = row.try_get("priority")?;
    let status: String = row.try_get("status")?;
    let signal: Option<serde_json::Value> = row.try_get("signal")?;
    let cancellation: Option<serde_json::Value> = row.try_get("cancellation")?;
    let escalation: Option<serde_json::Value> = row.try_get("escalation")?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        trigger: serde_json::from_value(row.try_get("trigger")?)?,
        target: row.try_get("target")?,
        signal: signal.map(serde_json::from_value).transpose()?,
        payload: row.try_get("payload")?,
        priority: priority.parse().map_err(RepositoryError::Serialization)?,
        status: status
            .parse()
            .map_err(|e: crate::domain::workflow::WorkflowError| RepositoryError::Serialization(e.to_string()))?,
        cancellation: cancellation.map(serde_json::from_value).transpose()?,
        escalation: escalation.map(serde_json::from_value).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn insert(&self, task: &Task) -> Result<(), RepositoryError> {
        let signal = task.signal.as_ref().map(serde_json::to_value).transpose()?;
        let escalation = task.escalation.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, trigger, target, signal, payload, priority, status,
                cancellation, escalation, created_at, updated_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id.0)
        .bind(serde_json::to_value(&task.trigger)?)
        .bind(&task.target)
        .bind(signal)
        .bind(&task.payload)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(escalation)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskState,
        escalation: Option<EscalationReason>,
    ) -> Result<Task, RepositoryError> {
        let escalation = escalation.as_ref().map(serde_json::to_value).transpose()?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks SET
                status = $2,
                escalation = COALESCE($3, escalation),
                updated_at = $4,
                finished_at = CASE WHEN $2 IN ('resolved', 'escalated') THEN $4 ELSE finished_at END
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(id.0)
        .bind(status.as_str())
        .bind(escalation)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(RepositoryError::NotFound(format!("task {}", id))),
        }
    }

    async fn request_cancellation(
        &self,
        id: TaskId,
        request: CancellationRequest,
    ) -> Result<Task, RepositoryError> {
        sqlx::query(
            r#"
            UPDATE tasks SET cancellation = $2, updated_at = NOW()
            WHERE id = $1
              AND cancellation IS NULL
              AND status NOT IN ('resolved', 'escalated')
            "#,
        )
        .bind(id.0)
        .bind(serde_json::to_value(&request)?)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))
    }

    async fn list(&self, status: Option<TaskState>, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TASK_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }
}
