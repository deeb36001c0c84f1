// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Invocation Record Repository

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::invocation::{AgentRole, InvocationKey, InvocationRecord, RecordId};
use crate::domain::repository::{InvocationRepository, RepositoryError};
use crate::domain::task::TaskId;

pub struct PostgresInvocationRepository {
    pool: PgPool,
}

impl PostgresInvocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str =
    "id, invocation_key, task_id, role, attempt, input, outcome, started_at, finished_at, duration_ms";

fn record_from_row(row: &PgRow) -> Result<InvocationRecord, RepositoryError> {
    let role: String = row.try_get("role")?;
    let attempt: i32 = row.try_get("attempt")?;
    let task_id: Option<uuid::Uuid> = row.try_get("task_id")?;
    let outcome: Option<serde_json::Value> = row.try_get("outcome")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;

    Ok(InvocationRecord {
        id: RecordId(row.try_get("id")?),
        invocation_key: InvocationKey(row.try_get("invocation_key")?),
        task_id: task_id.map(TaskId),
        role: role.parse::<AgentRole>().map_err(RepositoryError::Serialization)?,
        attempt: attempt as u32,
        input: row.try_get("input")?,
        outcome: outcome.map(serde_json::from_value).transpose()?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        duration_ms: duration_ms.map(|d| d as u64),
    })
}

#[async_trait]
impl InvocationRepository for PostgresInvocationRepository {
    async fn begin(&self, record: &InvocationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO invocation_records (id, invocation_key, task_id, role, attempt, input, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id.0)
        .bind(record.invocation_key.0)
        .bind(record.task_id.map(|t| t.0))
        .bind(record.role.as_str())
        .bind(record.attempt as i32)
        .bind(&record.input)
        .bind(record.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize(&self, record: &InvocationRecord) -> Result<(), RepositoryError> {
        let outcome = record.outcome.as_ref().map(serde_json::to_value).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE invocation_records
            SET outcome = $2, finished_at = $3, duration_ms = $4
            WHERE id = $1 AND outcome IS NULL
            "#,
        )
        .bind(record.id.0)
        .bind(outcome)
        .bind(record.finished_at)
        .bind(record.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(record.id).await? {
                Some(_) => Err(RepositoryError::Conflict(format!(
                    "invocation record {} is already finalized",
                    record.id
                ))),
                None => Err(RepositoryError::NotFound(format!("invocation record {}", record.id))),
            };
        }
        Ok(())
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<InvocationRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM invocation_records WHERE id = $1", RECORD_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<InvocationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM invocation_records WHERE task_id = $1 ORDER BY started_at ASC",
            RECORD_COLUMNS
        ))
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn find_by_key(&self, key: InvocationKey) -> Result<Vec<InvocationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM invocation_records WHERE invocation_key = $1 ORDER BY attempt ASC",
            RECORD_COLUMNS
        ))
        .bind(key.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
