// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Gateway Audit Repository

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::execution::{ActionResult, GatewayAuditEntry, GatewayDecision};
use crate::domain::invocation::RecordId;
use crate::domain::repository::{GatewayAuditRepository, RepositoryError};
use crate::domain::task::TaskId;

pub struct PostgresGatewayAuditRepository {
    pool: PgPool,
}

impl PostgresGatewayAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<GatewayAuditEntry, RepositoryError> {
    let root_cause: Option<uuid::Uuid> = row.try_get("root_cause_record")?;
    let decision: GatewayDecision = serde_json::from_value(row.try_get("detail")?)?;
    Ok(GatewayAuditEntry {
        id: row.try_get("id")?,
        task_id: TaskId(row.try_get("task_id")?),
        root_cause_record: root_cause.map(RecordId),
        idempotency_key: row.try_get("idempotency_key")?,
        action_type: row.try_get("action_type")?,
        target: row.try_get("target")?,
        scope: row.try_get("scope")?,
        decision,
        decided_at: row.try_get("decided_at")?,
    })
}

#[async_trait]
impl GatewayAuditRepository for PostgresGatewayAuditRepository {
    async fn record(&self, entry: &GatewayAuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO gateway_audit (
                id, task_id, root_cause_record, idempotency_key, action_type,
                target, scope, decision, detail, decided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.task_id.0)
        .bind(entry.root_cause_record.map(|r| r.0))
        .bind(&entry.idempotency_key)
        .bind(&entry.action_type)
        .bind(&entry.target)
        .bind(&entry.scope)
        .bind(entry.decision.label())
        .bind(serde_json::to_value(&entry.decision)?)
        .bind(entry.decided_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<GatewayAuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, root_cause_record, idempotency_key, action_type,
                   target, scope, detail, decided_at
            FROM gateway_audit
            WHERE task_id = $1
            ORDER BY decided_at ASC
            "#,
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn find_executed(&self, idempotency_key: &str) -> Result<Option<ActionResult>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT detail FROM gateway_audit
            WHERE idempotency_key = $1 AND decision = 'executed'
            ORDER BY decided_at ASC
            LIMIT 1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let decision: GatewayDecision = serde_json::from_value(row.try_get("detail")?)?;
                Ok(match decision {
                    GatewayDecision::Executed { result } => Some(result),
                    _ => None,
                })
            }
            None => Ok(None),
        }
    }
}
