// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Pool - Application Layer
//!
//! Routes invocations to the registered agent for a role. Every invocation
//! is wrapped with a deadline, recorded as an [`InvocationRecord`] and
//! deduplicated by its invocation key: when a finalized, reusable record
//! exists for the key, its outcome is returned and the agent is not called.
//!
//! Timed-out attempts are finalized as `TimedOut` and retried up to
//! `max_timeout_retries`; after that the caller gets [`AgentError::Timeout`].

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::agent::{Agent, AgentContext, AgentError, AgentOutcome};
use crate::domain::config::AgentsConfig;
use crate::domain::events::AgentEvent;
use crate::domain::invocation::{AgentRole, InvocationOutcome, InvocationRecord};
use crate::domain::repository::InvocationRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;

/// Result of one pool invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The finalized record the outcome comes from.
    pub record: InvocationRecord,
    pub outcome: AgentOutcome,
    /// True when the outcome was taken from an earlier record.
    pub reused: bool,
}

pub struct AgentPool {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
    invocations: Arc<dyn InvocationRepository>,
    event_bus: EventBus,
    config: AgentsConfig,
}

impl AgentPool {
    pub fn new(invocations: Arc<dyn InvocationRepository>, event_bus: EventBus, config: AgentsConfig) -> Self {
        Self {
            agents: HashMap::new(),
            invocations,
            event_bus,
            config,
        }
    }

    /// Register `agent` under its role, replacing any previous one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.role(), agent);
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn has_role(&self, role: AgentRole) -> bool {
        self.agents.contains_key(&role)
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.agents.keys().copied().collect();
        roles.sort();
        roles
    }

    pub fn timeout_for(&self, role: AgentRole) -> Duration {
        self.config.timeout_for(role.as_str())
    }

    pub async fn invoke(&self, role: AgentRole, context: &AgentContext) -> Result<Invocation, AgentError> {
        let agent = self.agents.get(&role).cloned().ok_or(AgentError::NotRegistered(role))?;
        let task_id = context.task.as_ref().map(|t| t.id);

        let previous = self.invocations.find_by_key(context.invocation_key).await?;
        if let Some(record) = previous.iter().rev().find(|r| r.role == role && r.is_reusable()) {
            if let Some(outcome) = record.outcome.as_ref().and_then(|o| o.agent_outcome()).cloned() {
                info!(
                    role = %role,
                    record_id = %record.id,
                    invocation_key = %context.invocation_key,
                    "Reusing finalized invocation"
                );
                self.event_bus.publish_agent_event(AgentEvent::InvocationReused {
                    record_id: record.id,
                    task_id,
                    role,
                    reused_at: Utc::now(),
                });
                return Ok(Invocation {
                    record: record.clone(),
                    outcome,
                    reused: true,
                });
            }
        }

        let timeout = self.timeout_for(role);
        let max_attempts = self.config.max_timeout_retries + 1;
        let first_attempt = previous.iter().map(|r| r.attempt).max().unwrap_or(0) + 1;

        for attempt in first_attempt..first_attempt + max_attempts {
            let mut record = InvocationRecord::start(context.invocation_key, task_id, role, attempt, context.summary());
            self.invocations.begin(&record).await?;
            self.event_bus.publish_agent_event(AgentEvent::InvocationStarted {
                record_id: record.id,
                invocation_key: record.invocation_key,
                task_id,
                role,
                attempt,
                started_at: record.started_at,
            });
            debug!(role = %role, attempt, record_id = %record.id, "Invoking agent");

            let started = Instant::now();
            let result = tokio::time::timeout(timeout, agent.handle(context)).await;
            let elapsed = started.elapsed();

            let (outcome, answered) = match result {
                Ok(outcome) => (InvocationOutcome::Completed { outcome: outcome.clone() }, Some(outcome)),
                Err(_) => (
                    InvocationOutcome::TimedOut {
                        after_ms: elapsed.as_millis() as u64,
                    },
                    None,
                ),
            };
            let label = outcome.label();
            // A fresh record cannot already be finalized
            let _ = record.finalize(outcome);
            self.invocations.finalize(&record).await?;

            metrics::record_invocation(role.as_str(), label, elapsed);
            self.event_bus.publish_agent_event(AgentEvent::InvocationFinished {
                record_id: record.id,
                task_id,
                role,
                outcome: label.to_string(),
                duration_ms: record.duration_ms.unwrap_or_default(),
                finished_at: record.finished_at.unwrap_or_else(Utc::now),
            });

            match answered {
                Some(outcome) => {
                    info!(
                        role = %role,
                        attempt,
                        record_id = %record.id,
                        outcome = label,
                        duration_ms = elapsed.as_millis() as u64,
                        "Agent invocation finished"
                    );
                    return Ok(Invocation {
                        record,
                        outcome,
                        reused: false,
                    });
                }
                None => {
                    warn!(role = %role, attempt, timeout = ?timeout, "Agent invocation timed out");
                }
            }
        }

        Err(AgentError::Timeout {
            role,
            attempts: max_attempts,
            timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::OutcomeReason;
    use crate::domain::invocation::InvocationKey;
    use crate::domain::task::{Priority, Task, TriggerSource};
    use crate::infrastructure::repositories::InMemoryInvocationRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sleeps past the deadline for the first `slow_calls` calls.
    struct CountingAgent {
        calls: AtomicU32,
        slow_calls: u32,
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn role(&self) -> AgentRole {
            AgentRole::Investigator
        }

        async fn handle(&self, _context: &AgentContext) -> AgentOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.slow_calls {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            AgentOutcome::Failure(OutcomeReason::general(format!("call {}", call)))
        }
    }

    fn config(retries: u32) -> AgentsConfig {
        AgentsConfig {
            invocation_timeout: Duration::from_millis(20),
            max_timeout_retries: retries,
            timeouts: HashMap::new(),
        }
    }

    fn context() -> AgentContext {
        let task = Task::new(
            TriggerSource::Api { submitted_by: "test".into() },
            "checkout",
            None,
            serde_json::Value::Null,
            Priority::Normal,
        );
        AgentContext::for_task(InvocationKey::for_step(task.id, "investigate"), task)
    }

    fn pool(agent: Arc<CountingAgent>, retries: u32) -> (AgentPool, Arc<InMemoryInvocationRepository>) {
        let records = Arc::new(InMemoryInvocationRepository::new());
        let pool = AgentPool::new(records.clone(), EventBus::new(64), config(retries)).with_agent(agent);
        (pool, records)
    }

    #[tokio::test]
    async fn finalized_invocation_is_reused() {
        let agent = Arc::new(CountingAgent { calls: AtomicU32::new(0), slow_calls: 0 });
        let (pool, records) = pool(agent.clone(), 0);
        let ctx = context();

        let first = pool.invoke(AgentRole::Investigator, &ctx).await.unwrap();
        let second = pool.invoke(AgentRole::Investigator, &ctx).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(records.find_by_key(ctx.invocation_key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_reported() {
        let agent = Arc::new(CountingAgent { calls: AtomicU32::new(0), slow_calls: 1 });
        let (pool, records) = pool(agent.clone(), 1);
        let ctx = context();

        let invocation = pool.invoke(AgentRole::Investigator, &ctx).await.unwrap();
        assert_eq!(invocation.record.attempt, 2);
        let attempts = records.find_by_key(ctx.invocation_key).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome.as_ref().unwrap().label(), "timed_out");

        let always_slow = Arc::new(CountingAgent { calls: AtomicU32::new(0), slow_calls: 10 });
        let (pool, records) = self::pool(always_slow, 2);
        let ctx = context();
        let err = pool.invoke(AgentRole::Investigator, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { attempts: 3, .. }));
        let attempts = records.find_by_key(ctx.invocation_key).await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|r| r.is_finalized() && !r.is_reusable()));
    }

    #[tokio::test]
    async fn unregistered_role_is_an_error() {
        let agent = Arc::new(CountingAgent { calls: AtomicU32::new(0), slow_calls: 0 });
        let (pool, _) = pool(agent, 0);
        let err = pool.invoke(AgentRole::Surgeon, &context()).await.unwrap_err();
        assert!(matches!(err, AgentError::NotRegistered(AgentRole::Surgeon)));
        assert_eq!(pool.roles(), vec![AgentRole::Investigator]);
    }
}
