// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Knowledge Repository
//!
//! Entries are stored as JSONB documents next to the columns used for
//! filtering (`category`, `source_task`, `expires_at`) and the live
//! `access_count`. Ranking runs in Rust through
//! [`rank_entries`](crate::domain::knowledge::rank_entries) so both backends
//! order results identically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::knowledge::{
    rank_entries, KnowledgeCategory, KnowledgeEntry, KnowledgeEntryId, KnowledgePage, KnowledgeQuery,
    KnowledgeStatistics,
};
use crate::domain::repository::{KnowledgeRepository, RepositoryError};
use crate::domain::task::TaskId;

pub struct PostgresKnowledgeRepository {
    pool: PgPool,
}

impl PostgresKnowledgeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<KnowledgeEntry, RepositoryError> {
    let mut entry: KnowledgeEntry = serde_json::from_value(row.try_get("body")?)?;
    let access_count: i64 = row.try_get("access_count")?;
    entry.access_count = access_count as u64;
    entry.updated_at = row.try_get("updated_at")?;
    Ok(entry)
}

#[async_trait]
impl KnowledgeRepository for PostgresKnowledgeRepository {
    async fn insert(&self, entry: &KnowledgeEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_entries (id, category, source_task, body, access_count, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.category.as_str())
        .bind(entry.source_task.map(|t| t.0))
        .bind(serde_json::to_value(entry)?)
        .bind(entry.access_count as i64)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_for_task(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError> {
        let task_id = entry
            .source_task
            .ok_or_else(|| RepositoryError::Conflict(format!("knowledge entry {} has no source task", entry.id)))?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_entries (id, category, source_task, body, access_count, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_task, category) WHERE source_task IS NOT NULL DO NOTHING
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.category.as_str())
        .bind(task_id.0)
        .bind(serde_json::to_value(entry)?)
        .bind(entry.access_count as i64)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        self.find_by_source_task(task_id, entry.category)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("knowledge entry for task {}", task_id)))
    }

    async fn curate(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError> {
        let existing = self
            .find_by_id(entry.id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("knowledge entry {}", entry.id)))?;

        let mut updated = entry.clone();
        updated.created_at = existing.created_at;
        updated.access_count = existing.access_count;
        updated.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE knowledge_entries
            SET category = $2, body = $3, updated_at = $4, expires_at = $5
            WHERE id = $1
            "#,
        )
        .bind(updated.id.0)
        .bind(updated.category.as_str())
        .bind(serde_json::to_value(&updated)?)
        .bind(updated.updated_at)
        .bind(updated.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn find_by_id(&self, id: KnowledgeEntryId) -> Result<Option<KnowledgeEntry>, RepositoryError> {
        let row = sqlx::query("SELECT body, access_count, updated_at FROM knowledge_entries WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn find_by_source_task(
        &self,
        task_id: TaskId,
        category: KnowledgeCategory,
    ) -> Result<Option<KnowledgeEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT body, access_count, updated_at FROM knowledge_entries WHERE source_task = $1 AND category = $2",
        )
        .bind(task_id.0)
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn query(&self, query: &KnowledgeQuery) -> Result<KnowledgePage, RepositoryError> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            SELECT body, access_count, updated_at FROM knowledge_entries
            WHERE ($1::TEXT IS NULL OR category = $1)
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(query.category.map(|c| c.as_str()))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        let mut page = rank_entries(entries, query, now);

        if !page.entries.is_empty() {
            let ids: Vec<uuid::Uuid> = page.entries.iter().map(|e| e.id.0).collect();
            sqlx::query("UPDATE knowledge_entries SET access_count = access_count + 1 WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await?;
            for entry in page.entries.iter_mut() {
                entry.access_count += 1;
            }
        }

        Ok(page)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM knowledge_entries WHERE expires_at IS NOT NULL AND expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn statistics(&self) -> Result<KnowledgeStatistics, RepositoryError> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            SELECT category,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE expires_at IS NOT NULL AND expires_at <= $1) AS expired
            FROM knowledge_entries
            GROUP BY category
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = KnowledgeStatistics::default();
        for row in rows {
            let category: String = row.try_get("category")?;
            let total: i64 = row.try_get("total")?;
            let expired: i64 = row.try_get("expired")?;
            stats.total += total as usize;
            stats.expired += expired as usize;
            stats.by_category.insert(category, total as usize);
        }
        Ok(stats)
    }
}
