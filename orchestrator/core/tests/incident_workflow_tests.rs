// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests of the incident workflow
//!
//! Each test assembles an in-memory orchestrator with static telemetry, a
//! dry-run executor and a log notifier, submits a trigger through the
//! ingress and drives the queue to completion with the coordinator.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vigil_core::application::coordinator::DeliveryOutcome;
use vigil_core::application::orchestrator::{Components, Orchestrator};
use vigil_core::application::repository_factory::Repositories;
use vigil_core::domain::checkpoint::Checkpoint;
use vigil_core::domain::config::{AgentsConfig, OrchestratorConfigManifest, OrchestratorConfigSpec, VerificationConfig};
use vigil_core::domain::events::TaskEvent;
use vigil_core::domain::execution::GatewayDecision;
use vigil_core::domain::invocation::AgentRole;
use vigil_core::domain::knowledge::{
    ActionStep, Applicability, KnowledgeCategory, KnowledgeEntry, Procedure, SopMatch,
};
use vigil_core::domain::lease::WorkerId;
use vigil_core::domain::policy::{ExecutionPolicy, PolicyRule};
use vigil_core::domain::repository::{CheckpointRepository, RepositoryError, TaskRepository};
use vigil_core::domain::task::{CancellationRequest, Priority, Signal, Task, TaskId, TriggerSource};
use vigil_core::domain::telemetry::{LogLine, MetricSample, SeriesPoint, TelemetryError, TelemetrySource, TraceSpan};
use vigil_core::domain::workflow::{validate_path, EscalationKind, TaskState, WorkflowProgress};
use vigil_core::infrastructure::executor::DryRunExecutor;
use vigil_core::infrastructure::notifier::{LogNotifier, NotificationDispatcher};
use vigil_core::infrastructure::summary_template::SummaryTemplateEngine;
use vigil_core::infrastructure::telemetry::{StaticTelemetrySource, TelemetryHealthProbe};

struct Harness {
    orchestrator: Orchestrator,
    executor: Arc<DryRunExecutor>,
    worker: WorkerId,
}

struct Setup {
    /// cpu_usage readings for `checkout`, consumed in order by the
    /// Investigator, the Surgeon's health check and the verification checks.
    cpu: Vec<f64>,
    policy: ExecutionPolicy,
    with_sop: bool,
    visibility_timeout: Duration,
    checkpoints: Option<Arc<dyn CheckpointRepository>>,
    telemetry: Telemetry,
    agents: AgentsConfig,
    max_deliveries: u32,
}

/// How the telemetry backend behaves while the Investigator reads it.
enum Telemetry {
    Static,
    /// Metric reads never return.
    Hanging,
    /// The first metric read cancels the task stored in the cell.
    CancelsTask(Arc<OnceLock<TaskId>>),
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            cpu: vec![97.0, 41.0],
            policy: restart_policy(),
            with_sop: true,
            visibility_timeout: Duration::from_secs(300),
            checkpoints: None,
            telemetry: Telemetry::Static,
            agents: AgentsConfig::default(),
            max_deliveries: 5,
        }
    }
}

fn restart_policy() -> ExecutionPolicy {
    ExecutionPolicy::new(vec![PolicyRule::new(
        "service.*",
        vec!["remediation:restart".to_string()],
    )])
}

fn spec(setup: &Setup) -> OrchestratorConfigSpec {
    let mut spec = OrchestratorConfigManifest::default().spec;
    spec.gateway.policy = setup.policy.clone();
    spec.agents = setup.agents.clone();
    spec.queue.max_deliveries = setup.max_deliveries;
    spec.coordinator.workers = 1;
    spec.coordinator.lease_ttl = Duration::from_secs(30);
    spec.queue.poll_interval = Duration::from_millis(20);
    spec.sentinel.enabled = false;
    spec.analyst.enabled = false;
    spec.verification = VerificationConfig {
        max_attempts: 3,
        poll_interval: Duration::from_millis(10),
        wait_window: Duration::from_secs(2),
    };
    spec
}

fn restart_sop() -> KnowledgeEntry {
    KnowledgeEntry::new(
        KnowledgeCategory::Sop,
        "Restart checkout on CPU saturation",
        "Restart the checkout deployment to shed the runaway workers.",
    )
    .with_applicability(Applicability {
        signatures: vec!["cpu_usage:checkout".to_string()],
        keywords: vec!["cpu".to_string()],
        services: vec!["checkout".to_string()],
    })
    .with_procedure(Procedure {
        steps: vec![ActionStep {
            action_type: "service.restart".to_string(),
            target: None,
            parameters: json!({ "graceful": true }),
        }],
        credential_scope: "remediation:restart".to_string(),
    })
}

fn cpu_alert() -> serde_json::Value {
    json!({
        "type": "alert",
        "source": "alertmanager",
        "alert_name": "HighCpu",
        "target": "checkout",
        "severity": "critical",
        "metric": "cpu_usage",
        "value": 97.0,
        "threshold": 80.0
    })
}

/// Static readings behind a configurable metric read.
struct ScriptedTelemetry {
    inner: StaticTelemetrySource,
    mode: Telemetry,
    tasks: Arc<dyn TaskRepository>,
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn metric(&self, metric: &str, target: &str) -> Result<Option<MetricSample>, TelemetryError> {
        match &self.mode {
            Telemetry::Static => {}
            Telemetry::Hanging => tokio::time::sleep(Duration::from_secs(60)).await,
            Telemetry::CancelsTask(cell) => {
                if let Some(task_id) = cell.get() {
                    let request = CancellationRequest {
                        reason: "operator took over".to_string(),
                        requested_at: chrono::Utc::now(),
                    };
                    self.tasks.request_cancellation(*task_id, request).await.unwrap();
                }
            }
        }
        self.inner.metric(metric, target).await
    }

    async fn logs(&self, target: &str, limit: usize) -> Result<Vec<LogLine>, TelemetryError> {
        self.inner.logs(target, limit).await
    }

    async fn traces(&self, target: &str, limit: usize) -> Result<Vec<TraceSpan>, TelemetryError> {
        self.inner.traces(target, limit).await
    }

    async fn series(&self, metric: &str, target: &str, lookback: Duration) -> Result<Vec<SeriesPoint>, TelemetryError> {
        self.inner.series(metric, target, lookback).await
    }
}

impl Harness {
    async fn new(setup: Setup) -> Self {
        let spec = spec(&setup);
        let mut repositories = Repositories::in_memory(setup.visibility_timeout);
        if let Some(checkpoints) = setup.checkpoints {
            repositories.checkpoints = checkpoints;
        }
        let telemetry: Arc<dyn TelemetrySource> = Arc::new(ScriptedTelemetry {
            inner: StaticTelemetrySource::new()
                .with_metric("cpu_usage", "checkout", setup.cpu)
                .with_log("checkout", "worker pool exhausted, request queue growing"),
            mode: setup.telemetry,
            tasks: repositories.tasks.clone(),
        });
        let executor = Arc::new(DryRunExecutor::new());
        if setup.with_sop {
            repositories.knowledge.insert(&restart_sop()).await.unwrap();
        }

        let components = Components {
            repositories,
            telemetry: telemetry.clone(),
            health_probe: Arc::new(TelemetryHealthProbe::new(telemetry, None)),
            executor: executor.clone(),
            notifier: NotificationDispatcher::new().with_channel("log", Arc::new(LogNotifier)),
            templates: SummaryTemplateEngine::new().unwrap(),
        };
        Self {
            orchestrator: Orchestrator::assemble(&spec, components),
            executor,
            worker: WorkerId::new("test-worker"),
        }
    }

    fn repos(&self) -> &Repositories {
        &self.orchestrator.repositories
    }

    async fn submit(&self) -> TaskId {
        self.orchestrator.ingress.submit(cpu_alert()).await.unwrap().task_id
    }

    /// Deliver queued messages until the queue stays empty for `wait`.
    async fn drain(&self, wait: Duration) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = self.repos().queue.dequeue(wait).await.unwrap() {
            let outcome = self
                .orchestrator
                .coordinator
                .handle_delivery(&self.worker, delivery)
                .await
                .unwrap();
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn task(&self, id: TaskId) -> Task {
        self.repos().tasks.find_by_id(id).await.unwrap().unwrap()
    }

    async fn states(&self, id: TaskId) -> Vec<TaskState> {
        let history = self.repos().checkpoints.history(id).await.unwrap();
        for (expected, checkpoint) in history.iter().enumerate() {
            assert_eq!(checkpoint.sequence, expected as u64, "checkpoint sequence must be dense");
        }
        history.into_iter().map(|c| c.state).collect()
    }

    async fn invocations_of(&self, id: TaskId, role: AgentRole) -> usize {
        self.repos()
            .invocations
            .find_by_task(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.role == role)
            .count()
    }

    async fn incident_entries(&self, id: TaskId) -> usize {
        let stats = self.repos().knowledge.statistics().await.unwrap();
        assert!(self
            .repos()
            .knowledge
            .find_by_source_task(id, KnowledgeCategory::HistoricalCase)
            .await
            .unwrap()
            .is_some());
        stats
            .by_category
            .get(KnowledgeCategory::HistoricalCase.as_str())
            .copied()
            .unwrap_or(0)
    }
}

#[tokio::test]
async fn test_cpu_anomaly_is_resolved_with_one_incident_record() {
    let harness = Harness::new(Setup::default()).await;
    let task_id = harness.submit().await;
    let mut events = harness.orchestrator.event_bus.subscribe_task(task_id);

    let outcomes = harness.drain(Duration::from_millis(50)).await;
    assert_eq!(outcomes, vec![DeliveryOutcome::Finished(TaskState::Resolved)]);

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Resolved);
    assert!(task.finished_at.is_some());

    let states = harness.states(task_id).await;
    assert_eq!(
        states,
        vec![
            TaskState::Queued,
            TaskState::Investigating,
            TaskState::RemediationKnown,
            TaskState::Remediating,
            TaskState::Verifying,
            TaskState::Resolved,
        ]
    );
    validate_path(&states).unwrap();

    let executed = harness.executor.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].action_type, "service.restart");
    assert_eq!(executed[0].target, "checkout");

    assert_eq!(harness.invocations_of(task_id, AgentRole::Clerk).await, 1);
    assert_eq!(harness.incident_entries(task_id).await, 1);
    let latest = harness.repos().checkpoints.latest(task_id).await.unwrap().unwrap();
    assert!(latest.progress.verification.iter().any(|c| c.healthy));
    assert_eq!(latest.progress.root_cause.unwrap().signature, "cpu_usage:checkout");

    let mut resolved = false;
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        if let Ok(TaskEvent::TaskResolved { summary_entry, .. }) = event {
            assert!(summary_entry.is_some());
            resolved = true;
            break;
        }
    }
    assert!(resolved, "TaskResolved event not published");
    assert_eq!(harness.repos().queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_remediation_escalates_without_surgeon() {
    let harness = Harness::new(Setup {
        with_sop: false,
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;
    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::NoKnownRemediation);
    assert_eq!(escalation.failure_point, TaskState::RemediationUnknown);
    assert!(escalation.root_cause.is_some());

    assert_eq!(harness.invocations_of(task_id, AgentRole::Surgeon).await, 0);
    assert!(harness.executor.executed().is_empty());
    assert_eq!(harness.incident_entries(task_id).await, 1);
    validate_path(&harness.states(task_id).await).unwrap();
}

#[tokio::test]
async fn test_authorization_denial_escalates_without_retry() {
    let harness = Harness::new(Setup {
        policy: ExecutionPolicy::deny_all(),
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;
    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::AuthorizationDenied);
    assert_eq!(escalation.failure_point, TaskState::Remediating);

    assert_eq!(harness.invocations_of(task_id, AgentRole::Surgeon).await, 1);
    assert!(harness.executor.executed().is_empty());
    let audit = harness.repos().audit.find_by_task(task_id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(matches!(audit[0].decision, GatewayDecision::Denied { .. }));
}

#[tokio::test]
async fn test_failed_post_checks_escalate_with_verification_failed() {
    // Healthy right after the restart, then back above the threshold
    let harness = Harness::new(Setup {
        cpu: vec![97.0, 41.0, 95.0],
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;
    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::VerificationFailed);
    assert_eq!(escalation.failure_point, TaskState::Verifying);
    assert!(escalation.detail.contains("still unhealthy after 3 check(s)"));
    assert!(escalation.describe().contains("while verifying"));

    let latest = harness.repos().checkpoints.latest(task_id).await.unwrap().unwrap();
    assert_eq!(latest.progress.verification.len(), 3);
    assert!(latest.progress.verification.iter().all(|c| !c.healthy));
    // Escalation is final: the executor ran once and nothing was retried
    assert_eq!(harness.executor.executed().len(), 1);
}

/// Fails the first append of a `Verifying` checkpoint, as if the worker died
/// right after the Surgeon returned.
struct CrashBeforeVerifying {
    inner: Arc<dyn CheckpointRepository>,
    crashed: AtomicBool,
}

#[async_trait]
impl CheckpointRepository for CrashBeforeVerifying {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        if checkpoint.state == TaskState::Verifying && !self.crashed.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Database("worker crashed".to_string()));
        }
        self.inner.append(checkpoint).await
    }

    async fn latest(&self, task_id: TaskId) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.latest(task_id).await
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.history(task_id).await
    }
}

#[tokio::test]
async fn test_redelivery_after_crash_yields_exactly_once_outcome() {
    let visibility = Duration::from_millis(200);
    let checkpoints: Arc<dyn CheckpointRepository> = Arc::new(CrashBeforeVerifying {
        inner: Repositories::in_memory(visibility).checkpoints,
        crashed: AtomicBool::new(false),
    });
    let harness = Harness::new(Setup {
        cpu: vec![97.0, 41.0],
        visibility_timeout: visibility,
        checkpoints: Some(checkpoints),
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;

    let first = harness.repos().queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
    let crashed = harness
        .orchestrator
        .coordinator
        .handle_delivery(&harness.worker, first)
        .await;
    assert!(crashed.is_err());
    assert_eq!(harness.task(task_id).await.status, TaskState::Remediating);

    // Redelivered once the visibility timeout expires
    let second = harness.repos().queue.dequeue(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(second.task_id, task_id);
    assert_eq!(second.delivery_count, 2);
    let outcome = harness
        .orchestrator
        .coordinator
        .handle_delivery(&WorkerId::new("second-worker"), second)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Finished(TaskState::Resolved));

    assert_eq!(harness.executor.executed().len(), 1);
    assert_eq!(harness.invocations_of(task_id, AgentRole::Investigator).await, 1);
    assert_eq!(harness.invocations_of(task_id, AgentRole::Surgeon).await, 1);
    assert_eq!(harness.incident_entries(task_id).await, 1);

    let states = harness.states(task_id).await;
    validate_path(&states).unwrap();
    assert_eq!(states.iter().filter(|s| **s == TaskState::Verifying).count(), 1);
    assert_eq!(harness.repos().queue.depth().await.unwrap(), 0);

    // A duplicate message for the finished task only repeats the deduplicated summary
    harness.repos().queue.enqueue(task_id, Priority::Urgent).await.unwrap();
    let outcomes = harness.drain(Duration::from_millis(50)).await;
    assert_eq!(outcomes, vec![DeliveryOutcome::Finished(TaskState::Resolved)]);
    assert_eq!(harness.states(task_id).await.len(), states.len());
    assert_eq!(harness.invocations_of(task_id, AgentRole::Clerk).await, 1);
    assert_eq!(harness.incident_entries(task_id).await, 1);
}

#[tokio::test]
async fn test_surgeon_never_runs_without_investigator_record() {
    let harness = Harness::new(Setup::default()).await;
    let sop = harness
        .repos()
        .knowledge
        .query(&vigil_core::domain::knowledge::KnowledgeQuery::category(KnowledgeCategory::Sop))
        .await
        .unwrap()
        .entries
        .remove(0);

    // A task whose checkpoints claim a known remediation but cite no record
    let task = Task::new(
        TriggerSource::Api { submitted_by: "test".to_string() },
        "checkout",
        Some(Signal { metric: "cpu_usage".to_string(), threshold: 80.0, observed: Some(97.0) }),
        serde_json::Value::Null,
        Priority::High,
    );
    harness.repos().tasks.insert(&task).await.unwrap();
    let initial = Checkpoint::initial(task.id);
    let investigating = initial
        .advance(TaskState::Investigating, None, serde_json::Value::Null, WorkflowProgress::default())
        .unwrap();
    let progress = WorkflowProgress {
        matched_sop: Some(SopMatch { entry_id: sop.id, title: sop.title.clone(), score: 1.0, exact: true }),
        ..WorkflowProgress::default()
    };
    let known = investigating
        .advance(TaskState::RemediationKnown, None, serde_json::Value::Null, progress)
        .unwrap();
    for checkpoint in [&initial, &investigating, &known] {
        harness.repos().checkpoints.append(checkpoint).await.unwrap();
    }
    harness.repos().queue.enqueue(task.id, task.priority).await.unwrap();

    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task.id).await;
    assert_eq!(task.status, TaskState::Escalated);
    assert_eq!(task.escalation.unwrap().kind, EscalationKind::MissingRootCause);
    assert_eq!(harness.invocations_of(task.id, AgentRole::Surgeon).await, 0);
    assert!(harness.executor.executed().is_empty());
}

#[tokio::test]
async fn test_cancelled_task_escalates_before_investigation() {
    let harness = Harness::new(Setup::default()).await;
    let task_id = harness.submit().await;
    harness
        .orchestrator
        .coordinator
        .request_cancellation(task_id, "duplicate of INC-1234")
        .await
        .unwrap();

    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::Cancelled);
    assert!(escalation.detail.contains("duplicate of INC-1234"));
    assert_eq!(harness.invocations_of(task_id, AgentRole::Investigator).await, 0);
    assert!(harness.executor.executed().is_empty());
}

#[tokio::test]
async fn test_leased_task_is_left_for_redelivery() {
    let harness = Harness::new(Setup::default()).await;
    let task_id = harness.submit().await;
    harness
        .repos()
        .leases
        .acquire(task_id, &WorkerId::new("other-worker"), chrono::Duration::seconds(30))
        .await
        .unwrap();

    let delivery = harness.repos().queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
    let outcome = harness
        .orchestrator
        .coordinator
        .handle_delivery(&harness.worker, delivery)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Deferred);
    assert_eq!(harness.task(task_id).await.status, TaskState::Queued);
    assert_eq!(harness.repos().queue.depth().await.unwrap(), 1);
    assert!(harness.repos().checkpoints.history(task_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workers_resolve_tasks_until_shutdown() {
    let harness = Harness::new(Setup::default()).await;
    let shutdown = CancellationToken::new();
    let handles = harness.orchestrator.start(shutdown.clone());

    let task_id = harness.submit().await;
    let mut events = harness.orchestrator.event_bus.subscribe_task(task_id);
    let resolved = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(TaskEvent::TaskResolved { .. }) => return true,
                Ok(TaskEvent::TaskEscalated { .. }) => return false,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    // The task may finish before the subscription; the store is authoritative
    assert!(resolved || harness.task(task_id).await.status == TaskState::Resolved);

    shutdown.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_investigator_timeouts_escalate_after_retries() {
    let harness = Harness::new(Setup {
        telemetry: Telemetry::Hanging,
        agents: AgentsConfig {
            invocation_timeout: Duration::from_millis(50),
            max_timeout_retries: 1,
            ..AgentsConfig::default()
        },
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;

    let outcomes = harness.drain(Duration::from_millis(50)).await;
    assert_eq!(outcomes, vec![DeliveryOutcome::Finished(TaskState::Escalated)]);

    let task = harness.task(task_id).await;
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::AgentTimeout);
    assert_eq!(escalation.failure_point, TaskState::Investigating);
    assert!(escalation.detail.contains("2 attempt(s)"), "{}", escalation.detail);

    let records: Vec<_> = harness
        .repos()
        .invocations
        .find_by_task(task_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.role == AgentRole::Investigator)
        .collect();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.outcome.as_ref().map(|o| o.label()) == Some("timed_out")));

    assert_eq!(harness.invocations_of(task_id, AgentRole::Surgeon).await, 0);
    assert!(harness.executor.executed().is_empty());
    assert_eq!(harness.incident_entries(task_id).await, 1);
    validate_path(&harness.states(task_id).await).unwrap();
}

#[tokio::test]
async fn test_result_returned_after_cancellation_is_discarded() {
    let cancel_target = Arc::new(OnceLock::new());
    let harness = Harness::new(Setup {
        telemetry: Telemetry::CancelsTask(cancel_target.clone()),
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;
    cancel_target.set(task_id).unwrap();

    harness.drain(Duration::from_millis(50)).await;

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::Cancelled);
    assert_eq!(escalation.failure_point, TaskState::Investigating);
    assert!(escalation.detail.contains("operator took over"));
    assert!(escalation.detail.contains("agent result discarded"));

    // The Investigator finished, but its root cause never reached a checkpoint
    assert_eq!(harness.invocations_of(task_id, AgentRole::Investigator).await, 1);
    let latest = harness.repos().checkpoints.latest(task_id).await.unwrap().unwrap();
    assert!(latest.progress.root_cause.is_none());
    assert_eq!(
        harness.states(task_id).await,
        vec![TaskState::Queued, TaskState::Investigating, TaskState::Escalated]
    );
    assert_eq!(harness.invocations_of(task_id, AgentRole::Surgeon).await, 0);
    assert!(harness.executor.executed().is_empty());
}

/// Rejects every `Investigating` checkpoint, so the task never gets past
/// its first step.
struct StuckBeforeInvestigating {
    inner: Arc<dyn CheckpointRepository>,
}

#[async_trait]
impl CheckpointRepository for StuckBeforeInvestigating {
    async fn append(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        if checkpoint.state == TaskState::Investigating {
            return Err(RepositoryError::Database("checkpoint store unavailable".to_string()));
        }
        self.inner.append(checkpoint).await
    }

    async fn latest(&self, task_id: TaskId) -> Result<Option<Checkpoint>, RepositoryError> {
        self.inner.latest(task_id).await
    }

    async fn history(&self, task_id: TaskId) -> Result<Vec<Checkpoint>, RepositoryError> {
        self.inner.history(task_id).await
    }
}

#[tokio::test]
async fn test_failing_task_escalates_at_delivery_limit() {
    let visibility = Duration::from_millis(150);
    let checkpoints: Arc<dyn CheckpointRepository> = Arc::new(StuckBeforeInvestigating {
        inner: Repositories::in_memory(visibility).checkpoints,
    });
    let harness = Harness::new(Setup {
        visibility_timeout: visibility,
        checkpoints: Some(checkpoints),
        max_deliveries: 2,
        ..Setup::default()
    })
    .await;
    let task_id = harness.submit().await;

    let first = harness.repos().queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
    assert_eq!(first.delivery_count, 1);
    let failed = harness
        .orchestrator
        .coordinator
        .handle_delivery(&harness.worker, first)
        .await;
    assert!(failed.is_err());

    let second = harness.repos().queue.dequeue(Duration::from_secs(2)).await.unwrap().unwrap();
    assert_eq!(second.delivery_count, 2);
    let outcome = harness
        .orchestrator
        .coordinator
        .handle_delivery(&harness.worker, second)
        .await
        .unwrap();
    assert_eq!(outcome, DeliveryOutcome::Finished(TaskState::Escalated));

    let task = harness.task(task_id).await;
    assert_eq!(task.status, TaskState::Escalated);
    let escalation = task.escalation.unwrap();
    assert_eq!(escalation.kind, EscalationKind::AgentFailure);
    assert!(escalation.detail.contains("giving up after 2 deliveries"), "{}", escalation.detail);

    assert_eq!(harness.invocations_of(task_id, AgentRole::Investigator).await, 0);
    assert_eq!(harness.repos().queue.depth().await.unwrap(), 0);
    assert!(harness.drain(Duration::from_millis(300)).await.is_empty());
}
