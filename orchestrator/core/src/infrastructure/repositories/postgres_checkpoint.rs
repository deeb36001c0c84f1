// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Checkpoint Repository
//!
//! Append-only checkpoint log keyed by `(task_id, sequence)`. The insert only
//! succeeds when the new sequence is exactly one past the stored maximum, so
//! two writers racing on the same task cannot both append.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::invocation::RecordId;
use crate::domain::repository::{CheckpointRepository, RepositoryError};
use crate::domain::task::TaskId;
use crate::domain::workflow::{TaskState, WorkflowError};

pub struct PostgresCheckpointRepository {
    pool: PgPool,
}

impl PostgresCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_state(value: &str) -> Result<TaskState, RepositoryError> {
    value
        .parse()
        .map_err(|e: WorkflowError| RepositoryError::Serialization(e.to_string()))
}

fn checkpoint_from_row(row: &PgRow) -> Result<Checkpoint, RepositoryError> {
    let from: Option<String> = row.try_get("from_state")?;
    let state: String = row.try_get("state")?;
    let sequence: i64 = row.try_get("sequence")?;
    let cause: Option<uuid::Uuid> = row.try_get("cause")?;

    Ok(Checkpoint {
        task_id: TaskId(row.try_get("task_id")?),
        sequence: sequence as u64,
        from: from.as_deref().map(parse_state).transpose()?,
        state: parse_state(&state)?,
        cause: cause.map(RecordId),
        output: row.try_get("output")?,
        progress: serde_json::from_value(row.try_get("progress")?)?,
        written_at: row.try_get("written_at")?,
    })
}

#[async_trait]
impl CheckpointRepository for PostgresCheckpointRepository {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (task_id, sequence, from_state, state, cause, output, progress, written_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE COALESCE((SELECT MAX(sequence) + 1 FROM checkpoints WHERE task_id = $1), 0) = $2
            ON CONFLICT (task_id, sequence) DO NOTHING
            "#,
        )
        .bind(checkpoint.task_id.0)
        .bind(checkpoint.sequence as i64)
        .bind(checkpoint.from.map(|s| s.as_str()))
        .bind(checkpoint.state.as_str())
        .bind(checkpoint.cause.map(|c| c.0))
        .bind(&checkpoint.output)
        .bind(serde_json::to_value(&checkpoint.progress)?)
        .bind(checkpoint.written_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "task {} checkpoint sequence {} is not next",
                checkpoint.task_id, checkpoint.sequence
            )));
        }
        Ok(())
    }

    async fn latest(&self, task_id: TaskId) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT task_id, sequence, from_state, state, cause, output, progress, written_at
            FROM checkpoints
            WHERE task_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, sequence, from_state, state, cause, output, progress, written_at
            FROM checkpoints
            WHERE task_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(checkpoint_from_row).collect()
    }
}
