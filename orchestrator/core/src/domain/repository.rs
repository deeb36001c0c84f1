// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the shared state and knowledge store: one
//! repository per aggregate, interface defined in the domain layer,
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TaskRepository` | `Task` | `InMemoryTaskRepository`, `PostgresTaskRepository` |
//! | `CheckpointRepository` | `Checkpoint` | `InMemoryCheckpointRepository`, `PostgresCheckpointRepository` |
//! | `InvocationRepository` | `InvocationRecord` | `InMemoryInvocationRepository`, `PostgresInvocationRepository` |
//! | `KnowledgeRepository` | `KnowledgeEntry` | `InMemoryKnowledgeRepository`, `PostgresKnowledgeRepository` |
//! | `LeaseManager` | `TaskLease` | `InMemoryLeaseManager`, `PostgresLeaseManager` |
//! | `GatewayAuditRepository` | `GatewayAuditEntry` | `InMemoryGatewayAuditRepository`, `PostgresGatewayAuditRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from the `storage`
//! section of `vigil-config.yaml`. In-memory implementations are used for
//! development and testing; PostgreSQL implementations for production and
//! for running several daemon processes against one store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::checkpoint::Checkpoint;
use crate::domain::execution::{ActionResult, GatewayAuditEntry};
use crate::domain::invocation::{InvocationKey, InvocationRecord, RecordId};
use crate::domain::knowledge::{
    KnowledgeCategory, KnowledgeEntry, KnowledgeEntryId, KnowledgePage, KnowledgeQuery, KnowledgeStatistics,
};
use crate::domain::lease::{LeaseError, TaskLease, WorkerId};
use crate::domain::task::{CancellationRequest, Task, TaskId};
use crate::domain::workflow::{EscalationReason, TaskState};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a newly created task.
    async fn insert(&self, task: &Task) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Write the workflow status. Touches only status fields so a concurrent
    /// cancellation request is never overwritten.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskState,
        escalation: Option<EscalationReason>,
    ) -> Result<Task, RepositoryError>;

    /// Record a cancellation request. The first request wins; terminal tasks
    /// are returned unchanged.
    async fn request_cancellation(
        &self,
        id: TaskId,
        request: CancellationRequest,
    ) -> Result<Task, RepositoryError>;

    /// Most recent first.
    async fn list(&self, status: Option<TaskState>, limit: usize) -> Result<Vec<Task>, RepositoryError>;
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Append a checkpoint. Fails with `Conflict` unless `sequence` is exactly
    /// one past the task's latest checkpoint (or `0` for the first one).
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError>;

    async fn latest(&self, task_id: TaskId) -> Result<Option<Checkpoint>, RepositoryError>;

    /// Oldest first.
    async fn history(&self, task_id: TaskId) -> Result<Vec<Checkpoint>, RepositoryError>;
}

#[async_trait]
pub trait InvocationRepository: Send + Sync {
    /// Store a started (not yet finalized) record.
    async fn begin(&self, record: &InvocationRecord) -> Result<(), RepositoryError>;

    /// Store the outcome of a started record. Fails with `Conflict` if the
    /// stored record is already finalized.
    async fn finalize(&self, record: &InvocationRecord) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<InvocationRecord>, RepositoryError>;

    /// Ordered by `started_at`.
    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<InvocationRecord>, RepositoryError>;

    /// Ordered by `attempt`.
    async fn find_by_key(&self, key: InvocationKey) -> Result<Vec<InvocationRecord>, RepositoryError>;

    /// Latest finalized record for `key` whose result can be reused.
    async fn find_reusable(&self, key: InvocationKey) -> Result<Option<InvocationRecord>, RepositoryError> {
        let records = self.find_by_key(key).await?;
        Ok(records.into_iter().rev().find(|r| r.is_reusable()))
    }
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn insert(&self, entry: &KnowledgeEntry) -> Result<(), RepositoryError>;

    /// Insert `entry` unless an entry of the same category already exists for
    /// its `source_task`. Returns the stored entry either way.
    async fn insert_for_task(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError>;

    /// Explicit curation update of an existing entry.
    async fn curate(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError>;

    async fn find_by_id(&self, id: KnowledgeEntryId) -> Result<Option<KnowledgeEntry>, RepositoryError>;

    async fn find_by_source_task(
        &self,
        task_id: TaskId,
        category: KnowledgeCategory,
    ) -> Result<Option<KnowledgeEntry>, RepositoryError>;

    /// Ranked, paged query. Returned entries have their access count bumped.
    async fn query(&self, query: &KnowledgeQuery) -> Result<KnowledgePage, RepositoryError>;

    /// Delete entries expired at `now`. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;

    async fn statistics(&self) -> Result<KnowledgeStatistics, RepositoryError>;
}

#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Take the lease for `task_id`. Fails with `Held` while another owner's
    /// lease is unexpired. Each acquisition gets a higher fencing token.
    async fn acquire(&self, task_id: TaskId, owner: &WorkerId, ttl: Duration) -> Result<TaskLease, LeaseError>;

    /// Extend a lease. Fails with `Lost` if the fencing token is no longer current.
    async fn renew(&self, lease: &TaskLease, ttl: Duration) -> Result<TaskLease, LeaseError>;

    /// Give the lease up. Releasing a lost lease is a no-op.
    async fn release(&self, lease: &TaskLease) -> Result<(), LeaseError>;

    async fn current(&self, task_id: TaskId) -> Result<Option<TaskLease>, LeaseError>;
}

#[async_trait]
pub trait GatewayAuditRepository: Send + Sync {
    async fn record(&self, entry: &GatewayAuditEntry) -> Result<(), RepositoryError>;

    /// Oldest first.
    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<GatewayAuditEntry>, RepositoryError>;

    /// Result of the action already executed under `idempotency_key`.
    async fn find_executed(&self, idempotency_key: &str) -> Result<Option<ActionResult>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
