// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete stores behind the shared state and knowledge store
//! and the task queue from the configured storage backend. The domain layer
//! only defines the traits; this module picks the implementations.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select repository implementations per storage backend

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::queue::TaskQueue;
use crate::domain::repository::{
    CheckpointRepository, GatewayAuditRepository, InvocationRepository, KnowledgeRepository, LeaseManager,
    StorageBackend, TaskRepository,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::queue::{InMemoryTaskQueue, PostgresTaskQueue};
use crate::infrastructure::repositories::{
    InMemoryCheckpointRepository, InMemoryGatewayAuditRepository, InMemoryInvocationRepository,
    InMemoryKnowledgeRepository, InMemoryLeaseManager, InMemoryTaskRepository, PostgresCheckpointRepository,
    PostgresGatewayAuditRepository, PostgresInvocationRepository, PostgresKnowledgeRepository, PostgresLeaseManager,
    PostgresTaskRepository,
};

/// Creates a TaskRepository implementation based on the configured backend
pub fn create_task_repository(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn TaskRepository> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresTaskRepository::new(pool.clone())),
        _ => Arc::new(InMemoryTaskRepository::new()),
    }
}

pub fn create_checkpoint_repository(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn CheckpointRepository> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresCheckpointRepository::new(pool.clone())),
        _ => Arc::new(InMemoryCheckpointRepository::new()),
    }
}

pub fn create_invocation_repository(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn InvocationRepository> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresInvocationRepository::new(pool.clone())),
        _ => Arc::new(InMemoryInvocationRepository::new()),
    }
}

pub fn create_knowledge_repository(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn KnowledgeRepository> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresKnowledgeRepository::new(pool.clone())),
        _ => Arc::new(InMemoryKnowledgeRepository::new()),
    }
}

pub fn create_lease_manager(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn LeaseManager> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresLeaseManager::new(pool.clone())),
        _ => Arc::new(InMemoryLeaseManager::new()),
    }
}

pub fn create_audit_repository(backend: &StorageBackend, pool: Option<&PgPool>) -> Arc<dyn GatewayAuditRepository> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresGatewayAuditRepository::new(pool.clone())),
        _ => Arc::new(InMemoryGatewayAuditRepository::new()),
    }
}

pub fn create_task_queue(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
    visibility_timeout: Duration,
) -> Arc<dyn TaskQueue> {
    match (backend, pool) {
        (StorageBackend::PostgreSQL(_), Some(pool)) => Arc::new(PostgresTaskQueue::new(pool.clone(), visibility_timeout)),
        _ => Arc::new(InMemoryTaskQueue::new(visibility_timeout)),
    }
}

/// Every store the orchestrator works against, built for one backend.
#[derive(Clone)]
pub struct Repositories {
    pub tasks: Arc<dyn TaskRepository>,
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub invocations: Arc<dyn InvocationRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub leases: Arc<dyn LeaseManager>,
    pub audit: Arc<dyn GatewayAuditRepository>,
    pub queue: Arc<dyn TaskQueue>,
}

impl Repositories {
    pub fn for_backend(backend: &StorageBackend, pool: Option<&PgPool>, visibility_timeout: Duration) -> Self {
        Self {
            tasks: create_task_repository(backend, pool),
            checkpoints: create_checkpoint_repository(backend, pool),
            invocations: create_invocation_repository(backend, pool),
            knowledge: create_knowledge_repository(backend, pool),
            leases: create_lease_manager(backend, pool),
            audit: create_audit_repository(backend, pool),
            queue: create_task_queue(backend, pool, visibility_timeout),
        }
    }

    pub fn in_memory(visibility_timeout: Duration) -> Self {
        Self::for_backend(&StorageBackend::InMemory, None, visibility_timeout)
    }

    /// Connect to the configured backend. For PostgreSQL, pending migrations
    /// are applied before the stores are handed out.
    pub async fn connect(backend: &StorageBackend, visibility_timeout: Duration) -> Result<Self> {
        match backend {
            StorageBackend::InMemory => {
                info!("Using in-memory storage backend");
                Ok(Self::in_memory(visibility_timeout))
            }
            StorageBackend::PostgreSQL(config) => {
                let database = Database::new(config).await.context("Failed to connect to PostgreSQL")?;
                database.migrate().await?;
                info!("Using PostgreSQL storage backend");
                Ok(Self::for_backend(backend, Some(database.get_pool()), visibility_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PostgresConfig;

    #[tokio::test]
    async fn postgres_backend_without_pool_falls_back_to_memory() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://unused".into(),
            max_connections: 1,
        });
        let repositories = Repositories::for_backend(&backend, None, Duration::from_secs(30));
        assert_eq!(repositories.queue.depth().await.unwrap(), 0);
        assert!(repositories.tasks.list(None, 10).await.unwrap().is_empty());
    }
}
