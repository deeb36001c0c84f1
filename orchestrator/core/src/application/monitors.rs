// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Periodic agents.
//!
//! The Sentinel and the Analyst are not part of any task workflow. They run
//! on their own schedule through the agent pool, so their invocations are
//! recorded and bounded by the same deadlines as task steps.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::agent_pool::AgentPool;
use crate::application::ingress::EventIngress;
use crate::domain::agent::{AgentContext, AgentOutcome, Artifact};
use crate::domain::invocation::AgentRole;
use crate::domain::knowledge::{KnowledgeEntry, KnowledgeQuery, QueryCriteria};
use crate::domain::repository::{KnowledgeRepository, RepositoryError};

/// Runs the Sentinel and forwards new breaches to the ingress.
///
/// A rule that keeps breaching produces one trigger; it fires again only
/// after it has been observed healthy.
pub struct SentinelMonitor {
    pool: Arc<AgentPool>,
    ingress: Arc<EventIngress>,
    interval: Duration,
    firing: tokio::sync::Mutex<HashSet<(String, String)>>,
}

impl SentinelMonitor {
    pub fn new(pool: Arc<AgentPool>, ingress: Arc<EventIngress>, interval: Duration) -> Self {
        Self {
            pool,
            ingress,
            interval,
            firing: tokio::sync::Mutex::new(HashSet::new()),
        }
    }

    /// One Sentinel pass. Returns the number of triggers submitted.
    pub async fn tick(&self) -> usize {
        let triggers = match self.pool.invoke(AgentRole::Sentinel, &AgentContext::scheduled()).await {
            Ok(invocation) => match invocation.outcome {
                AgentOutcome::Success(Artifact::Triggers(triggers)) => triggers,
                other => {
                    warn!(outcome = other.label(), reason = ?other.reason(), "Sentinel pass produced no triggers");
                    return 0;
                }
            },
            Err(e) => {
                error!(error = %e, "Sentinel invocation failed");
                return 0;
            }
        };

        let breached: HashSet<(String, String)> = triggers.iter().map(breach_key).collect();
        let mut firing = self.firing.lock().await;
        let mut submitted = 0;
        for trigger in triggers {
            let key = breach_key(&trigger);
            if firing.contains(&key) {
                debug!(alert = %key.0, target = %key.1, "Breach already reported");
                continue;
            }
            match self.ingress.submit(trigger).await {
                Ok(ack) => {
                    info!(alert = %key.0, target = %key.1, task_id = %ack.task_id, "Sentinel raised a task");
                    submitted += 1;
                }
                Err(e) => {
                    warn!(alert = %key.0, target = %key.1, error = %e, "Sentinel trigger rejected");
                    continue;
                }
            }
            firing.insert(key);
        }
        firing.retain(|key| breached.contains(key));
        submitted
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?self.interval, "Sentinel monitor started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("Sentinel monitor stopped");
        })
    }
}

fn breach_key(trigger: &serde_json::Value) -> (String, String) {
    let field = |name: &str| {
        trigger
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    (field("alert_name"), field("target"))
}

/// Runs the Analyst and keeps one current finding per series in the
/// knowledge store. Expired findings are purged on every pass.
pub struct AnalystScheduler {
    pool: Arc<AgentPool>,
    knowledge: Arc<dyn KnowledgeRepository>,
    interval: Duration,
}

impl AnalystScheduler {
    pub fn new(pool: Arc<AgentPool>, knowledge: Arc<dyn KnowledgeRepository>, interval: Duration) -> Self {
        Self {
            pool,
            knowledge,
            interval,
        }
    }

    /// One Analyst pass. Returns the number of findings stored.
    pub async fn tick(&self) -> usize {
        match self.knowledge.purge_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Expired findings purged"),
            Err(e) => warn!(error = %e, "Failed to purge expired knowledge"),
        }

        let findings = match self.pool.invoke(AgentRole::Analyst, &AgentContext::scheduled()).await {
            Ok(invocation) => match invocation.outcome {
                AgentOutcome::Success(Artifact::Findings(findings)) => findings,
                other => {
                    warn!(outcome = other.label(), reason = ?other.reason(), "Analyst pass produced no findings");
                    return 0;
                }
            },
            Err(e) => {
                error!(error = %e, "Analyst invocation failed");
                return 0;
            }
        };

        let mut stored = 0;
        for finding in findings {
            match self.upsert(finding).await {
                Ok(entry) => {
                    debug!(entry_id = %entry.id, title = %entry.title, "Finding stored");
                    stored += 1;
                }
                Err(e) => warn!(error = %e, "Failed to store finding"),
            }
        }
        stored
    }

    /// Replace the finding for the same series, if one exists.
    async fn upsert(&self, mut finding: KnowledgeEntry) -> Result<KnowledgeEntry, RepositoryError> {
        let tag = finding
            .tags
            .iter()
            .find(|t| t.starts_with("series:"))
            .cloned();
        let existing = match &tag {
            Some(tag) => {
                let query = KnowledgeQuery::category(finding.category)
                    .with_criteria(QueryCriteria {
                        tags: vec![tag.clone()],
                        ..QueryCriteria::default()
                    })
                    .with_limit(1);
                self.knowledge.query(&query).await?.entries.into_iter().next()
            }
            None => None,
        };

        match existing {
            Some(previous) => {
                finding.id = previous.id;
                finding.created_at = previous.created_at;
                self.knowledge.curate(&finding).await
            }
            None => {
                self.knowledge.insert(&finding).await?;
                Ok(finding)
            }
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?self.interval, "Analyst scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("Analyst scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agents::analyst::series_tag;
    use crate::application::agents::{Analyst, Sentinel};
    use crate::domain::config::{AgentsConfig, CapacitySeries, SentinelRule};
    use crate::domain::knowledge::KnowledgeCategory;
    use crate::domain::task::Severity;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::queue::InMemoryTaskQueue;
    use crate::infrastructure::repositories::{
        InMemoryInvocationRepository, InMemoryKnowledgeRepository, InMemoryTaskRepository,
    };
    use crate::domain::queue::TaskQueue;
    use crate::infrastructure::telemetry::StaticTelemetrySource;

    fn rule() -> SentinelRule {
        SentinelRule {
            alert_name: "HighCpu".into(),
            metric: "cpu_usage".into(),
            target: "checkout".into(),
            threshold: 80.0,
            severity: Severity::Critical,
        }
    }

    #[tokio::test]
    async fn sustained_breach_raises_one_task() {
        // breach, breach, recover, breach
        let telemetry = Arc::new(
            StaticTelemetrySource::new().with_metric("cpu_usage", "checkout", vec![95.0, 96.0, 40.0, 97.0]),
        );
        let bus = EventBus::new(64);
        let pool = Arc::new(
            AgentPool::new(Arc::new(InMemoryInvocationRepository::new()), bus.clone(), AgentsConfig::default())
                .with_agent(Arc::new(Sentinel::new(telemetry, vec![rule()]))),
        );
        let queue = Arc::new(InMemoryTaskQueue::new(Duration::from_secs(30)));
        let ingress = Arc::new(EventIngress::new(
            Arc::new(InMemoryTaskRepository::new()),
            queue.clone(),
            bus,
            Severity::Critical,
        ));
        let monitor = SentinelMonitor::new(pool, ingress, Duration::from_secs(60));

        assert_eq!(monitor.tick().await, 1);
        assert_eq!(monitor.tick().await, 0);
        assert_eq!(monitor.tick().await, 0);
        assert_eq!(monitor.tick().await, 1);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn findings_are_replaced_per_series() {
        let telemetry = Arc::new(
            StaticTelemetrySource::new().with_metric("disk_used_gb", "db-1", vec![50.0, 60.0, 70.0, 80.0]),
        );
        let week = Duration::from_secs(7 * 86_400);
        let series = vec![CapacitySeries {
            metric: "disk_used_gb".into(),
            target: "db-1".into(),
            capacity: 100.0,
        }];
        let pool = Arc::new(
            AgentPool::new(Arc::new(InMemoryInvocationRepository::new()), EventBus::new(16), AgentsConfig::default())
                .with_agent(Arc::new(Analyst::new(telemetry, series, week, week))),
        );
        let knowledge = Arc::new(InMemoryKnowledgeRepository::new());
        let scheduler = AnalystScheduler::new(pool, knowledge.clone(), Duration::from_secs(3600));

        assert_eq!(scheduler.tick().await, 1);
        assert_eq!(scheduler.tick().await, 1);

        let query = KnowledgeQuery::category(KnowledgeCategory::CapacityFinding)
            .with_criteria(QueryCriteria {
                tags: vec![series_tag("disk_used_gb", "db-1")],
                ..QueryCriteria::default()
            });
        let page = knowledge.query(&query).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].author, "analyst");
    }
}
