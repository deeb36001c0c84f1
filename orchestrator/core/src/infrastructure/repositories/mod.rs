// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository ports defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations, safe to share between daemon processes:
//! - **PostgresTaskRepository** - Task aggregate and cancellation requests
//! - **PostgresCheckpointRepository** - Append-only checkpoint log (sequence checked)
//! - **PostgresInvocationRepository** - Agent invocation records
//! - **PostgresKnowledgeRepository** - Knowledge entries
//! - **PostgresLeaseManager** - Task leases with fencing tokens
//! - **PostgresGatewayAuditRepository** - Gateway audit trail
//!
//! ## In-Memory Repositories
//!
//! Single-process implementations for development and tests, with the same
//! conflict semantics as the PostgreSQL ones.

pub mod postgres_audit;
pub mod postgres_checkpoint;
pub mod postgres_invocation;
pub mod postgres_knowledge;
pub mod postgres_lease;
pub mod postgres_task;

pub use postgres_audit::PostgresGatewayAuditRepository;
pub use postgres_checkpoint::PostgresCheckpointRepository;
pub use postgres_invocation::PostgresInvocationRepository;
pub use postgres_knowledge::PostgresKnowledgeRepository;
pub use postgres_lease::PostgresLeaseManager;
pub use postgres_task::PostgresTaskRepository;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::execution::{ActionResult, GatewayAuditEntry};
use crate::domain::invocation::{InvocationKey, InvocationRecord, RecordId};
use crate::domain::knowledge::{
    rank_entries, KnowledgeCategory, KnowledgeEntry, KnowledgeEntryId, KnowledgePage, KnowledgeQuery,
    KnowledgeStatistics,
};
use crate::domain::lease::{LeaseError, TaskLease, WorkerId};
use crate::domain::repository::{
    CheckpointRepository, GatewayAuditRepository, InvocationRepository, KnowledgeRepository, LeaseManager,
    RepositoryError, TaskRepository,
};
use crate::domain::task::{CancellationRequest, Task, TaskId};
use crate::domain::workflow::{EscalationReason, TaskState};

#[derive(Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(RepositoryError::Conflict(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskState,
        escalation: Option<EscalationReason>,
    ) -> Result<Task, RepositoryError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?;
        task.apply_status(status, escalation);
        Ok(task.clone())
    }

    async fn request_cancellation(
        &self,
        id: TaskId,
        request: CancellationRequest,
    ) -> Result<Task, RepositoryError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("task {}", id)))?;
        if !task.is_terminal() && task.cancellation.is_none() {
            task.cancellation = Some(request);
            task.updated_at = Utc::now();
        }
        Ok(task.clone())
    }

    async fn list(&self, status: Option<TaskState>, limit: usize) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read();
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointRepository {
    checkpoints: Arc<RwLock<HashMap<TaskId, Vec<Checkpoint>>>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let mut checkpoints = self.checkpoints.write();
        let log = checkpoints.entry(checkpoint.task_id).or_default();
        let expected = log.last().map(|c| c.sequence + 1).unwrap_or(0);
        if checkpoint.sequence != expected {
            return Err(RepositoryError::Conflict(format!(
                "task {} expected checkpoint sequence {}, got {}",
                checkpoint.task_id, expected, checkpoint.sequence
            )));
        }
        log.push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self, task_id: TaskId) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self
            .checkpoints
            .read()
            .get(&task_id)
            .and_then(|log| log.last().cloned()))
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<Checkpoint>, RepositoryError> {
        Ok(self.checkpoints.read().get(&task_id).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryInvocationRepository {
    records: Arc<RwLock<Vec<InvocationRecord>>>,
}

impl InMemoryInvocationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvocationRepository for InMemoryInvocationRepository {
    async fn begin(&self, record: &InvocationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(RepositoryError::Conflict(format!("invocation record {} already exists", record.id)));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn finalize(&self, record: &InvocationRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("invocation record {}", record.id)))?;
        if stored.is_finalized() {
            return Err(RepositoryError::Conflict(format!(
                "invocation record {} is already finalized",
                record.id
            )));
        }
        stored.outcome = record.outcome.clone();
        stored.finished_at = record.finished_at;
        stored.duration_ms = record.duration_ms;
        Ok(())
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<InvocationRecord>, RepositoryError> {
        Ok(self.records.read().iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<InvocationRecord>, RepositoryError> {
        let mut found: Vec<InvocationRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.task_id == Some(task_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(found)
    }

    async fn find_by_key(&self, key: InvocationKey) -> Result<Vec<InvocationRecord>, RepositoryError> {
        let mut found: Vec<InvocationRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.invocation_key == key)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.attempt);
        Ok(found)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryKnowledgeRepository {
    entries: Arc<RwLock<HashMap<KnowledgeEntryId, KnowledgeEntry>>>,
}

impl InMemoryKnowledgeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn insert(&self, entry: &KnowledgeEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.id) {
            return Err(RepositoryError::Conflict(format!("knowledge entry {} already exists", entry.id)));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn insert_for_task(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError> {
        let task_id = entry
            .source_task
            .ok_or_else(|| RepositoryError::Conflict(format!("knowledge entry {} has no source task", entry.id)))?;
        let mut entries = self.entries.write();
        if let Some(existing) = entries
            .values()
            .find(|e| e.source_task == Some(task_id) && e.category == entry.category)
        {
            return Ok(existing.clone());
        }
        entries.insert(entry.id, entry.clone());
        Ok(entry.clone())
    }

    async fn curate(&self, entry: &KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError> {
        let mut entries = self.entries.write();
        let stored = entries
            .get_mut(&entry.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("knowledge entry {}", entry.id)))?;
        let mut updated = entry.clone();
        updated.created_at = stored.created_at;
        updated.access_count = stored.access_count;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn find_by_id(&self, id: KnowledgeEntryId) -> Result<Option<KnowledgeEntry>, RepositoryError> {
        Ok(self.entries.read().get(&id).cloned())
    }

    async fn find_by_source_task(
        &self,
        task_id: TaskId,
        category: KnowledgeCategory,
    ) -> Result<Option<KnowledgeEntry>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .values()
            .find(|e| e.source_task == Some(task_id) && e.category == category)
            .cloned())
    }

    async fn query(&self, query: &KnowledgeQuery) -> Result<KnowledgePage, RepositoryError> {
        let mut entries = self.entries.write();
        let snapshot: Vec<KnowledgeEntry> = entries.values().cloned().collect();
        let mut page = rank_entries(snapshot, query, Utc::now());
        for returned in page.entries.iter_mut() {
            if let Some(stored) = entries.get_mut(&returned.id) {
                stored.access_count += 1;
                returned.access_count = stored.access_count;
            }
        }
        Ok(page)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    async fn statistics(&self) -> Result<KnowledgeStatistics, RepositoryError> {
        let entries = self.entries.read();
        Ok(KnowledgeStatistics::from_entries(entries.values(), Utc::now()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLeaseManager {
    leases: Arc<DashMap<TaskId, TaskLease>>,
    tokens: Arc<DashMap<TaskId, u64>>,
}

impl InMemoryLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&self, task_id: TaskId) -> u64 {
        let mut token = self.tokens.entry(task_id).or_insert(0);
        *token += 1;
        *token
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn acquire(&self, task_id: TaskId, owner: &WorkerId, ttl: Duration) -> Result<TaskLease, LeaseError> {
        let now = Utc::now();
        match self.leases.entry(task_id) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if &current.owner != owner && !current.is_expired(now) {
                    return Err(LeaseError::Held {
                        task_id,
                        owner: current.owner.clone(),
                        expires_at: current.expires_at,
                    });
                }
                let lease = TaskLease::new(task_id, owner.clone(), self.next_token(task_id), ttl);
                occupied.insert(lease.clone());
                Ok(lease)
            }
            Entry::Vacant(vacant) => {
                let lease = TaskLease::new(task_id, owner.clone(), self.next_token(task_id), ttl);
                vacant.insert(lease.clone());
                Ok(lease)
            }
        }
    }

    async fn renew(&self, lease: &TaskLease, ttl: Duration) -> Result<TaskLease, LeaseError> {
        let lost = || LeaseError::Lost {
            task_id: lease.task_id,
            fencing_token: lease.fencing_token,
        };
        let mut current = self.leases.get_mut(&lease.task_id).ok_or_else(lost)?;
        if current.fencing_token != lease.fencing_token || current.owner != lease.owner {
            return Err(lost());
        }
        current.expires_at = Utc::now() + ttl;
        Ok(current.clone())
    }

    async fn release(&self, lease: &TaskLease) -> Result<(), LeaseError> {
        self.leases
            .remove_if(&lease.task_id, |_, current| current.fencing_token == lease.fencing_token);
        Ok(())
    }

    async fn current(&self, task_id: TaskId) -> Result<Option<TaskLease>, LeaseError> {
        Ok(self.leases.get(&task_id).map(|l| l.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryGatewayAuditRepository {
    entries: Arc<RwLock<Vec<GatewayAuditEntry>>>,
}

impl InMemoryGatewayAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GatewayAuditRepository for InMemoryGatewayAuditRepository {
    async fn record(&self, entry: &GatewayAuditEntry) -> Result<(), RepositoryError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn find_by_task(&self, task_id: TaskId) -> Result<Vec<GatewayAuditEntry>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn find_executed(&self, idempotency_key: &str) -> Result<Option<ActionResult>, RepositoryError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.idempotency_key == idempotency_key)
            .find_map(|e| e.executed_result().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentOutcome, OutcomeReason};
    use crate::domain::invocation::{AgentRole, InvocationOutcome};
    use crate::domain::task::{Priority, TriggerSource};
    use crate::domain::workflow::WorkflowProgress;

    fn task() -> Task {
        Task::new(
            TriggerSource::Api { submitted_by: "ops".into() },
            "checkout",
            None,
            serde_json::json!({}),
            Priority::Normal,
        )
    }

    #[tokio::test]
    async fn checkpoint_append_rejects_gaps_and_duplicates() {
        let repo = InMemoryCheckpointRepository::new();
        let task_id = TaskId::new();
        let first = Checkpoint::initial(task_id);
        repo.append(&first).await.unwrap();
        assert!(matches!(repo.append(&first).await, Err(RepositoryError::Conflict(_))));

        let second = first
            .advance(TaskState::Investigating, None, serde_json::Value::Null, WorkflowProgress::default())
            .unwrap();
        repo.append(&second).await.unwrap();
        assert_eq!(repo.latest(task_id).await.unwrap().unwrap().sequence, 1);
        assert_eq!(repo.history(task_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_does_not_touch_terminal_tasks() {
        let repo = InMemoryTaskRepository::new();
        let task = task();
        repo.insert(&task).await.unwrap();
        repo.update_status(task.id, TaskState::Escalated, None).await.unwrap();
        let after = repo
            .request_cancellation(
                task.id,
                CancellationRequest { reason: "late".into(), requested_at: Utc::now() },
            )
            .await
            .unwrap();
        assert!(after.cancellation.is_none());
    }

    #[tokio::test]
    async fn status_update_keeps_cancellation() {
        let repo = InMemoryTaskRepository::new();
        let task = task();
        repo.insert(&task).await.unwrap();
        repo.request_cancellation(task.id, CancellationRequest { reason: "stop".into(), requested_at: Utc::now() })
            .await
            .unwrap();
        let updated = repo.update_status(task.id, TaskState::Investigating, None).await.unwrap();
        assert!(updated.is_cancellation_requested());
    }

    #[tokio::test]
    async fn finalized_records_are_immutable() {
        let repo = InMemoryInvocationRepository::new();
        let key = InvocationKey::ad_hoc();
        let mut record = InvocationRecord::start(key, None, AgentRole::Analyst, 1, serde_json::Value::Null);
        repo.begin(&record).await.unwrap();
        record
            .finalize(InvocationOutcome::Completed {
                outcome: AgentOutcome::Failure(OutcomeReason::general("no data")),
            })
            .unwrap();
        repo.finalize(&record).await.unwrap();
        assert!(matches!(repo.finalize(&record).await, Err(RepositoryError::Conflict(_))));
        assert_eq!(repo.find_reusable(key).await.unwrap().unwrap().id, record.id);
    }

    #[tokio::test]
    async fn insert_for_task_is_idempotent() {
        let repo = InMemoryKnowledgeRepository::new();
        let task_id = TaskId::new();
        let first = KnowledgeEntry::new(KnowledgeCategory::HistoricalCase, "case", "one").for_task(task_id);
        let second = KnowledgeEntry::new(KnowledgeCategory::HistoricalCase, "case", "two").for_task(task_id);
        let stored_first = repo.insert_for_task(&first).await.unwrap();
        let stored_second = repo.insert_for_task(&second).await.unwrap();
        assert_eq!(stored_first.id, stored_second.id);
        assert_eq!(repo.statistics().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn query_bumps_access_count() {
        let repo = InMemoryKnowledgeRepository::new();
        let entry = KnowledgeEntry::new(KnowledgeCategory::ArchitectureFact, "checkout talks to ledger", "x");
        repo.insert(&entry).await.unwrap();
        let query = KnowledgeQuery::category(KnowledgeCategory::ArchitectureFact);
        repo.query(&query).await.unwrap();
        let page = repo.query(&query).await.unwrap();
        assert_eq!(page.entries[0].access_count, 2);
    }

    #[tokio::test]
    async fn lease_is_exclusive_and_fenced() {
        let leases = InMemoryLeaseManager::new();
        let task_id = TaskId::new();
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");
        let ttl = Duration::seconds(30);

        let lease_a = leases.acquire(task_id, &a, ttl).await.unwrap();
        assert!(matches!(leases.acquire(task_id, &b, ttl).await, Err(LeaseError::Held { .. })));

        // An expired lease can be taken over; the old holder is fenced out.
        let short = leases.acquire(task_id, &a, Duration::milliseconds(-1)).await.unwrap();
        assert!(short.fencing_token > lease_a.fencing_token);
        let lease_b = leases.acquire(task_id, &b, ttl).await.unwrap();
        assert!(matches!(leases.renew(&short, ttl).await, Err(LeaseError::Lost { .. })));

        leases.release(&short).await.unwrap();
        assert_eq!(leases.current(task_id).await.unwrap().unwrap().owner, b);
        leases.release(&lease_b).await.unwrap();
        assert!(leases.current(task_id).await.unwrap().is_none());
    }
}
