// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Lease Manager
//!
//! One row per task in `task_leases`. Acquisition is a single upsert that
//! only overwrites a row owned by the same worker or already expired; the
//! fencing token is incremented on every acquisition. Released leases keep
//! their row (owner cleared, expired) so the token never goes backwards.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::lease::{LeaseError, TaskLease, WorkerId};
use crate::domain::repository::LeaseManager;
use crate::domain::task::TaskId;

pub struct PostgresLeaseManager {
    pool: PgPool,
}

impl PostgresLeaseManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lease_from_row(row: &PgRow) -> Result<TaskLease, sqlx::Error> {
    let token: i64 = row.try_get("fencing_token")?;
    let owner: String = row.try_get("owner")?;
    Ok(TaskLease {
        task_id: TaskId(row.try_get("task_id")?),
        owner: WorkerId(owner),
        fencing_token: token as u64,
        acquired_at: row.try_get("acquired_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn store_error(err: sqlx::Error) -> LeaseError {
    LeaseError::Repository(err.into())
}

#[async_trait]
impl LeaseManager for PostgresLeaseManager {
    async fn acquire(&self, task_id: TaskId, owner: &WorkerId, ttl: Duration) -> Result<TaskLease, LeaseError> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO task_leases (task_id, owner, fencing_token, acquired_at, expires_at)
            VALUES ($1, $2, 1, $3, $4)
            ON CONFLICT (task_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                fencing_token = task_leases.fencing_token + 1,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE task_leases.owner IS NULL
               OR task_leases.owner = EXCLUDED.owner
               OR task_leases.expires_at <= $3
            RETURNING task_id, owner, fencing_token, acquired_at, expires_at
            "#,
        )
        .bind(task_id.0)
        .bind(&owner.0)
        .bind(now)
        .bind(now + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        if let Some(row) = row {
            return lease_from_row(&row).map_err(store_error);
        }

        match self.current(task_id).await? {
            Some(held) => Err(LeaseError::Held {
                task_id,
                owner: held.owner,
                expires_at: held.expires_at,
            }),
            // Released between the upsert and the read; let the caller retry.
            None => Err(LeaseError::Held {
                task_id,
                owner: WorkerId::new("unknown"),
                expires_at: now,
            }),
        }
    }

    async fn renew(&self, lease: &TaskLease, ttl: Duration) -> Result<TaskLease, LeaseError> {
        let row = sqlx::query(
            r#"
            UPDATE task_leases SET expires_at = $4
            WHERE task_id = $1 AND owner = $2 AND fencing_token = $3
            RETURNING task_id, owner, fencing_token, acquired_at, expires_at
            "#,
        )
        .bind(lease.task_id.0)
        .bind(&lease.owner.0)
        .bind(lease.fencing_token as i64)
        .bind(Utc::now() + ttl)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => lease_from_row(&row).map_err(store_error),
            None => Err(LeaseError::Lost {
                task_id: lease.task_id,
                fencing_token: lease.fencing_token,
            }),
        }
    }

    async fn release(&self, lease: &TaskLease) -> Result<(), LeaseError> {
        sqlx::query(
            r#"
            UPDATE task_leases SET owner = NULL, expires_at = NOW()
            WHERE task_id = $1 AND fencing_token = $2
            "#,
        )
        .bind(lease.task_id.0)
        .bind(lease.fencing_token as i64)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn current(&self, task_id: TaskId) -> Result<Option<TaskLease>, LeaseError> {
        let row = sqlx::query(
            r#"
            SELECT task_id, owner, fencing_token, acquired_at, expires_at
            FROM task_leases
            WHERE task_id = $1 AND owner IS NOT NULL
            "#,
        )
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(lease_from_row).transpose().map_err(store_error)
    }
}
