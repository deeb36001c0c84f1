// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task leases: a time-bounded exclusive right of one worker to write a
//! task's checkpoints. Every acquisition increments the task's fencing token,
//! so a worker that lost its lease can detect it on the next renewal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::repository::RepositoryError;
use crate::domain::task::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `<prefix>-<short uuid>`, unique per process start.
    pub fn generate(prefix: &str) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", prefix, &id[..8]))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLease {
    pub task_id: TaskId,
    pub owner: WorkerId,
    pub fencing_token: u64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TaskLease {
    pub fn new(task_id: TaskId, owner: WorkerId, fencing_token: u64, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            owner,
            fencing_token,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Task {task_id} is leased by {owner} until {expires_at}")]
    Held {
        task_id: TaskId,
        owner: WorkerId,
        expires_at: DateTime<Utc>,
    },

    #[error("Lease on task {task_id} was lost (fencing token {fencing_token})")]
    Lost { task_id: TaskId, fencing_token: u64 },

    #[error("Lease store error: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expires_after_ttl() {
        let lease = TaskLease::new(TaskId::new(), WorkerId::new("w1"), 1, Duration::seconds(30));
        assert!(!lease.is_expired(Utc::now()));
        assert!(lease.is_expired(Utc::now() + Duration::seconds(31)));
    }

    #[test]
    fn generated_worker_ids_differ() {
        let a = WorkerId::generate("worker");
        let b = WorkerId::generate("worker");
        assert_ne!(a, b);
        assert!(a.0.starts_with("worker-"));
    }
}
