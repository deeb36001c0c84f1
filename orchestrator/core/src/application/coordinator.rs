// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Workflow Coordinator
//!
//! Drives each task through its state machine:
//!
//! ```text
//! Queued -> Investigating -> RemediationKnown   -> Remediating -> Verifying -> Resolved
//!                         \-> RemediationUnknown -> Escalated
//! (any non-terminal state may move to Escalated)
//! ```
//!
//! Workers pull deliveries from the task queue. For each delivery the worker
//! takes the task lease, resumes from the latest checkpoint and runs steps
//! until the task is terminal. Every transition is appended to the
//! checkpoint log (sequence checked) after renewing the lease, so a worker
//! that lost its lease never writes. Agent steps use deterministic
//! invocation keys, so a re-run step after a crash reuses the finalized
//! invocation instead of calling the agent again.
//!
//! On a terminal state the Clerk records the incident, a task event is
//! published, the delivery is acknowledged and the lease released.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::agent_pool::{AgentPool, Invocation};
use crate::domain::agent::{
    AgentContext, AgentError, AgentOutcome, Artifact, ReasonCode, RemediationReport, RootCauseHypothesis,
};
use crate::domain::checkpoint::Checkpoint;
use crate::domain::config::VerificationConfig;
use crate::domain::events::TaskEvent;
use crate::domain::invocation::{AgentRole, InvocationKey, RecordId};
use crate::domain::knowledge::{KnowledgeCategory, KnowledgeEntry, KnowledgeQuery, QueryCriteria, SopMatcher};
use crate::domain::lease::{LeaseError, TaskLease, WorkerId};
use crate::domain::queue::{Delivery, QueueError, TaskQueue};
use crate::domain::repository::{
    CheckpointRepository, InvocationRepository, KnowledgeRepository, LeaseManager, RepositoryError, TaskRepository,
};
use crate::domain::task::{CancellationRequest, Task, TaskId};
use crate::domain::telemetry::HealthProbe;
use crate::domain::workflow::{
    EscalationKind, EscalationReason, TaskState, VerificationCheck, WorkflowError, WorkflowProgress,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;

/// SOPs considered by the matcher for one root cause.
const SOP_CANDIDATE_LIMIT: usize = 200;

pub const STEP_INVESTIGATE: &str = "investigate";
pub const STEP_REMEDIATE: &str = "remediate";
pub const STEP_SUMMARIZE: &str = "summarize";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Lease on task {0} was lost")]
    LeaseLost(TaskId),

    #[error("Checkpoint conflict on task {task_id}: {detail}")]
    CheckpointConflict { task_id: TaskId, detail: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lease(LeaseError),
}

impl From<LeaseError> for CoordinatorError {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Lost { task_id, .. } => CoordinatorError::LeaseLost(task_id),
            LeaseError::Repository(e) => CoordinatorError::Repository(e),
            held @ LeaseError::Held { .. } => CoordinatorError::Lease(held),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The task reached (or already was in) a terminal state.
    Finished(TaskState),
    /// Another worker holds the lease; the message will come back.
    Deferred,
    /// The message referenced no task and was discarded.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub workers: usize,
    pub lease_ttl: Duration,
    pub poll_interval: Duration,
    /// Delivery on which a task that keeps failing is escalated.
    pub max_deliveries: u32,
    pub sop_match_threshold: f64,
    pub knowledge_snapshot_limit: usize,
    pub verification: VerificationConfig,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_ttl: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            max_deliveries: 5,
            sop_match_threshold: 0.6,
            knowledge_snapshot_limit: 10,
            verification: VerificationConfig::default(),
        }
    }
}

pub struct WorkflowCoordinator {
    tasks: Arc<dyn TaskRepository>,
    checkpoints: Arc<dyn CheckpointRepository>,
    invocations: Arc<dyn InvocationRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    leases: Arc<dyn LeaseManager>,
    queue: Arc<dyn TaskQueue>,
    pool: Arc<AgentPool>,
    health_probe: Arc<dyn HealthProbe>,
    event_bus: EventBus,
    matcher: SopMatcher,
    settings: CoordinatorSettings,
}

/// Per-delivery state: the lease currently held and the active checkpoint.
struct Run {
    worker: WorkerId,
    lease: TaskLease,
    checkpoint: Checkpoint,
}

impl WorkflowCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        checkpoints: Arc<dyn CheckpointRepository>,
        invocations: Arc<dyn InvocationRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        leases: Arc<dyn LeaseManager>,
        queue: Arc<dyn TaskQueue>,
        pool: Arc<AgentPool>,
        health_probe: Arc<dyn HealthProbe>,
        event_bus: EventBus,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            tasks,
            checkpoints,
            invocations,
            knowledge,
            leases,
            queue,
            pool,
            health_probe,
            event_bus,
            matcher: SopMatcher::new(settings.sop_match_threshold),
            settings,
        }
    }

    /// Spawn `settings.workers` competing workers. They stop after their
    /// current delivery once `shutdown` is cancelled.
    pub fn spawn_workers(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.settings.workers.max(1))
            .map(|_| {
                let coordinator = Arc::clone(self);
                let worker = WorkerId::generate("worker");
                let shutdown = shutdown.clone();
                tokio::spawn(async move { coordinator.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, worker: WorkerId, shutdown: CancellationToken) {
        info!(worker = %worker, "Coordinator worker started");
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.queue.dequeue(self.settings.poll_interval) => delivery,
            };
            match delivery {
                Ok(Some(delivery)) => {
                    let task_id = delivery.task_id;
                    if let Err(e) = self.handle_delivery(&worker, delivery).await {
                        error!(worker = %worker, task_id = %task_id, error = %e, "Task processing aborted");
                    }
                    if let Ok(depth) = self.queue.depth().await {
                        metrics::set_queue_depth(depth);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker = %worker, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }
        info!(worker = %worker, "Coordinator worker stopped");
    }

    /// Process one delivery to completion.
    pub async fn handle_delivery(&self, worker: &WorkerId, delivery: Delivery) -> Result<DeliveryOutcome, CoordinatorError> {
        let task_id = delivery.task_id;
        if self.tasks.find_by_id(task_id).await?.is_none() {
            warn!(task_id = %task_id, message_id = %delivery.message_id, "Discarding message for unknown task");
            self.ack(&delivery).await;
            return Ok(DeliveryOutcome::Dropped);
        }

        let lease = match self.leases.acquire(task_id, worker, self.lease_ttl()).await {
            Ok(lease) => lease,
            Err(LeaseError::Held { owner, expires_at, .. }) => {
                debug!(
                    task_id = %task_id,
                    owner = %owner,
                    expires_at = %expires_at,
                    "Task leased by another worker, leaving message for redelivery"
                );
                return Ok(DeliveryOutcome::Deferred);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            task_id = %task_id,
            worker = %worker,
            fencing_token = lease.fencing_token,
            delivery_count = delivery.delivery_count,
            "Lease acquired"
        );

        if delivery.delivery_count > self.settings.max_deliveries {
            let detail = format!("message delivered {} times without completing", delivery.delivery_count);
            return self.abandon(worker, &delivery, lease, detail).await;
        }

        match self.drive(worker, lease.clone(), task_id).await {
            Ok(state) => {
                self.ack(&delivery).await;
                self.release_lease(&lease).await;
                Ok(DeliveryOutcome::Finished(state))
            }
            Err(e @ CoordinatorError::LeaseLost(_)) => {
                warn!(task_id = %task_id, worker = %worker, "Lease lost, abandoning task without writing");
                Err(e)
            }
            Err(e) if delivery.delivery_count >= self.settings.max_deliveries => {
                let detail = format!("giving up after {} deliveries: {}", delivery.delivery_count, e);
                self.abandon(worker, &delivery, lease, detail).await
            }
            Err(e) => {
                // The message stays in flight and is redelivered after the
                // visibility timeout; the next owner resumes from the checkpoint.
                self.release_lease(&lease).await;
                Err(e)
            }
        }
    }

    /// Escalate a task whose message keeps coming back, then acknowledge it.
    async fn abandon(
        &self,
        worker: &WorkerId,
        delivery: &Delivery,
        lease: TaskLease,
        detail: String,
    ) -> Result<DeliveryOutcome, CoordinatorError> {
        let task_id = delivery.task_id;
        error!(
            task_id = %task_id,
            delivery_count = delivery.delivery_count,
            limit = self.settings.max_deliveries,
            "Delivery limit reached, escalating task"
        );
        let result = async {
            let mut run = Run {
                worker: worker.clone(),
                lease: lease.clone(),
                checkpoint: self.current_checkpoint(task_id).await?,
            };
            if !run.checkpoint.is_terminal() {
                self.escalate(&mut run, EscalationKind::AgentFailure, None, detail).await?;
            }
            self.finalize(&run).await?;
            Ok::<_, CoordinatorError>(run.checkpoint.state)
        }
        .await;

        match result {
            Ok(state) => {
                self.ack(delivery).await;
                self.release_lease(&lease).await;
                Ok(DeliveryOutcome::Finished(state))
            }
            Err(e @ CoordinatorError::LeaseLost(_)) => Err(e),
            Err(e) => {
                self.release_lease(&lease).await;
                Err(e)
            }
        }
    }

    /// Record a cancellation request. The owning worker honours it between
    /// steps. Terminal tasks are returned unchanged.
    pub async fn request_cancellation(&self, task_id: TaskId, reason: impl Into<String>) -> Result<Task, CoordinatorError> {
        let existing = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or(CoordinatorError::TaskNotFound(task_id))?;
        if existing.is_terminal() || existing.is_cancellation_requested() {
            return Ok(existing);
        }

        let request = CancellationRequest {
            reason: reason.into(),
            requested_at: Utc::now(),
        };
        let task = self.tasks.request_cancellation(task_id, request).await?;
        if let Some(cancellation) = &task.cancellation {
            info!(task_id = %task_id, reason = %cancellation.reason, "Cancellation requested");
            self.event_bus.publish_task_event(TaskEvent::CancellationRequested {
                task_id,
                reason: cancellation.reason.clone(),
                requested_at: cancellation.requested_at,
            });
        }
        Ok(task)
    }

    fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(120))
    }

    async fn ack(&self, delivery: &Delivery) {
        match self.queue.ack(&delivery.receipt).await {
            Ok(()) => {}
            Err(QueueError::StaleReceipt(message_id)) => {
                warn!(
                    task_id = %delivery.task_id,
                    message_id = %message_id,
                    "Receipt is stale, the redelivered copy will be acknowledged by its worker"
                );
            }
            Err(e) => error!(task_id = %delivery.task_id, error = %e, "Failed to acknowledge message"),
        }
    }

    async fn release_lease(&self, lease: &TaskLease) {
        if let Err(e) = self.leases.release(lease).await {
            warn!(task_id = %lease.task_id, error = %e, "Failed to release lease");
        }
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Latest checkpoint of `task_id`, writing the initial one on first pickup.
    async fn current_checkpoint(&self, task_id: TaskId) -> Result<Checkpoint, CoordinatorError> {
        match self.checkpoints.latest(task_id).await? {
            Some(checkpoint) => {
                info!(
                    task_id = %task_id,
                    state = %checkpoint.state,
                    sequence = checkpoint.sequence,
                    "Resuming from checkpoint"
                );
                Ok(checkpoint)
            }
            None => {
                let initial = Checkpoint::initial(task_id);
                self.checkpoints.append(&initial).await.map_err(|e| conflict(task_id, e))?;
                Ok(initial)
            }
        }
    }

    async fn drive(&self, worker: &WorkerId, lease: TaskLease, task_id: TaskId) -> Result<TaskState, CoordinatorError> {
        let checkpoint = self.current_checkpoint(task_id).await?;
        let mut run = Run {
            worker: worker.clone(),
            lease,
            checkpoint,
        };

        // A crash between checkpoint append and status write leaves the task
        // one step behind its checkpoint
        let task = self.load_task(task_id).await?;
        if task.status != run.checkpoint.state {
            self.tasks
                .update_status(task_id, run.checkpoint.state, run.checkpoint.progress.escalation.clone())
                .await?;
        }

        while !run.checkpoint.is_terminal() {
            let task = self.load_task(task_id).await?;
            if let Some(cancellation) = &task.cancellation {
                let detail = format!("cancelled: {}", cancellation.reason);
                self.escalate(&mut run, EscalationKind::Cancelled, None, detail).await?;
                break;
            }

            match run.checkpoint.state {
                TaskState::Queued => {
                    let progress = run.checkpoint.progress.clone();
                    self.transition(&mut run, TaskState::Investigating, None, serde_json::Value::Null, progress)
                        .await?;
                }
                TaskState::Investigating => self.investigate(&mut run, task).await?,
                TaskState::RemediationKnown => self.start_remediation(&mut run).await?,
                TaskState::RemediationUnknown => {
                    let detail = format!(
                        "no SOP scored at or above {:.2} for the root cause",
                        self.matcher.threshold()
                    );
                    self.escalate(&mut run, EscalationKind::NoKnownRemediation, None, detail)
                        .await?;
                }
                TaskState::Remediating => self.remediate(&mut run, task).await?,
                TaskState::Verifying => self.verify(&mut run, task).await?,
                TaskState::Resolved | TaskState::Escalated => break,
            }
        }

        self.finalize(&run).await?;
        Ok(run.checkpoint.state)
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Task, CoordinatorError> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or(CoordinatorError::TaskNotFound(task_id))
    }

    /// Agents that return after a cancellation request have their result discarded.
    async fn cancelled_meanwhile(&self, run: &mut Run) -> Result<bool, CoordinatorError> {
        let task = self.load_task(run.checkpoint.task_id).await?;
        match task.cancellation {
            Some(cancellation) => {
                let detail = format!("cancelled: {} (agent result discarded)", cancellation.reason);
                self.escalate(run, EscalationKind::Cancelled, None, detail).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn investigate(&self, run: &mut Run, task: Task) -> Result<(), CoordinatorError> {
        let snapshot = self.knowledge_snapshot(&task).await?;
        let history = self.invocations.find_by_task(task.id).await?;
        let context = AgentContext::for_task(InvocationKey::for_step(task.id, STEP_INVESTIGATE), task)
            .with_knowledge(snapshot)
            .with_progress(run.checkpoint.progress.clone())
            .with_history(history);

        let Some(invocation) = self.invoke(run, AgentRole::Investigator, &context).await? else {
            return Ok(());
        };
        if self.cancelled_meanwhile(run).await? {
            return Ok(());
        }

        match invocation.outcome {
            AgentOutcome::Success(Artifact::RootCause(root_cause)) => {
                let candidates = self.sop_candidates(&root_cause).await?;
                let matched = self.matcher.best_match(&root_cause, &candidates);
                info!(
                    task_id = %run.checkpoint.task_id,
                    signature = %root_cause.signature,
                    confidence = root_cause.confidence,
                    sop = ?matched.as_ref().map(|m| &m.title),
                    "Root cause established"
                );

                let next = if matched.is_some() {
                    TaskState::RemediationKnown
                } else {
                    TaskState::RemediationUnknown
                };
                let output = json!({ "root_cause": &root_cause, "matched_sop": &matched });
                let mut progress = run.checkpoint.progress.clone();
                progress.root_cause = Some(root_cause);
                progress.investigator_record = Some(invocation.record.id);
                progress.matched_sop = matched;
                self.transition(run, next, Some(invocation.record.id), output, progress).await
            }
            AgentOutcome::Success(other) => {
                let detail = format!("investigator returned an unexpected artifact: {}", other.to_json());
                self.escalate(run, EscalationKind::AgentFailure, Some(invocation.record.id), detail).await
            }
            AgentOutcome::Failure(reason) => {
                let kind = escalation_kind(reason.code, EscalationKind::AgentFailure);
                self.escalate(run, kind, Some(invocation.record.id), reason.message).await
            }
            AgentOutcome::NeedsEscalation(reason) => {
                let kind = escalation_kind(reason.code, EscalationKind::AgentRequestedEscalation);
                self.escalate(run, kind, Some(invocation.record.id), reason.message).await
            }
        }
    }

    /// `RemediationKnown -> Remediating`, only with a finalized root-cause record.
    async fn start_remediation(&self, run: &mut Run) -> Result<(), CoordinatorError> {
        let record = match run.checkpoint.progress.investigator_record {
            Some(id) => self.invocations.find_by_id(id).await?,
            None => None,
        };
        if !record.map(|r| r.is_root_cause_record()).unwrap_or(false) {
            let detail = "remediation requested without a finalized investigator record".to_string();
            return self.escalate(run, EscalationKind::MissingRootCause, None, detail).await;
        }
        let progress = run.checkpoint.progress.clone();
        self.transition(run, TaskState::Remediating, None, serde_json::Value::Null, progress)
            .await
    }

    async fn remediate(&self, run: &mut Run, task: Task) -> Result<(), CoordinatorError> {
        let sop = match &run.checkpoint.progress.matched_sop {
            Some(matched) => self.knowledge.find_by_id(matched.entry_id).await?,
            None => None,
        };
        let Some(sop) = sop else {
            let detail = "the selected SOP is no longer in the knowledge store".to_string();
            return self.escalate(run, EscalationKind::AgentFailure, None, detail).await;
        };

        let history = self.invocations.find_by_task(task.id).await?;
        let context = AgentContext::for_task(InvocationKey::for_step(task.id, STEP_REMEDIATE), task)
            .with_knowledge(vec![sop])
            .with_progress(run.checkpoint.progress.clone())
            .with_history(history);

        let Some(invocation) = self.invoke(run, AgentRole::Surgeon, &context).await? else {
            return Ok(());
        };
        if self.cancelled_meanwhile(run).await? {
            return Ok(());
        }

        match invocation.outcome {
            AgentOutcome::Success(Artifact::Remediation(report)) => {
                let output = report_json(&report);
                let mut progress = run.checkpoint.progress.clone();
                progress.remediation = Some(report);
                self.transition(run, TaskState::Verifying, Some(invocation.record.id), output, progress)
                    .await
            }
            AgentOutcome::Success(other) => {
                let detail = format!("surgeon returned an unexpected artifact: {}", other.to_json());
                self.escalate(run, EscalationKind::AgentFailure, Some(invocation.record.id), detail).await
            }
            AgentOutcome::Failure(reason) => {
                let kind = escalation_kind(reason.code, EscalationKind::AgentFailure);
                self.escalate(run, kind, Some(invocation.record.id), reason.message).await
            }
            AgentOutcome::NeedsEscalation(reason) => {
                let kind = escalation_kind(reason.code, EscalationKind::AgentRequestedEscalation);
                self.escalate(run, kind, Some(invocation.record.id), reason.message).await
            }
        }
    }

    /// Re-check the triggering signal until it is back at baseline, the
    /// attempts run out or the wait window closes.
    async fn verify(&self, run: &mut Run, task: Task) -> Result<(), CoordinatorError> {
        let config = &self.settings.verification;
        let deadline = tokio::time::Instant::now() + config.wait_window;
        let signal = task.signal.as_ref();
        let mut progress = run.checkpoint.progress.clone();
        let max_attempts = config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let report = self
                .health_probe
                .check(&task.target, signal.map(|s| s.metric.as_str()), signal.map(|s| s.threshold))
                .await;
            let check = match report {
                Ok(report) => VerificationCheck {
                    attempt,
                    healthy: report.healthy,
                    observed: report.observed,
                    detail: report.detail,
                    checked_at: Utc::now(),
                },
                Err(e) => VerificationCheck {
                    attempt,
                    healthy: false,
                    observed: None,
                    detail: format!("probe failed: {}", e),
                    checked_at: Utc::now(),
                },
            };
            debug!(task_id = %task.id, attempt, healthy = check.healthy, detail = %check.detail, "Verification check");
            let healthy = check.healthy;
            progress.verification.push(check);

            if healthy {
                let output = json!({ "verification": &progress.verification });
                return self.transition(run, TaskState::Resolved, None, output, progress).await;
            }
            if attempt == max_attempts || tokio::time::Instant::now() + config.poll_interval > deadline {
                break;
            }
            tokio::time::sleep(config.poll_interval).await;
            if self.load_task(task.id).await?.is_cancellation_requested() {
                // The loop in `drive` escalates on the next pass
                run.checkpoint.progress.verification = progress.verification;
                return Ok(());
            }
        }

        let last = progress
            .verification
            .last()
            .map(|c| c.detail.clone())
            .unwrap_or_default();
        let detail = format!(
            "signal still unhealthy after {} check(s): {}",
            progress.verification.len(),
            last
        );
        run.checkpoint.progress.verification = progress.verification;
        self.escalate(run, EscalationKind::VerificationFailed, None, detail).await
    }

    /// Invoke an agent; a timeout past the retry bound escalates the task and
    /// yields `None`.
    async fn invoke(
        &self,
        run: &mut Run,
        role: AgentRole,
        context: &AgentContext,
    ) -> Result<Option<Invocation>, CoordinatorError> {
        match self.pool.invoke(role, context).await {
            Ok(invocation) => Ok(Some(invocation)),
            Err(e @ AgentError::Timeout { .. }) => {
                self.escalate(run, EscalationKind::AgentTimeout, None, e.to_string()).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn escalate(
        &self,
        run: &mut Run,
        kind: EscalationKind,
        cause: Option<RecordId>,
        detail: String,
    ) -> Result<(), CoordinatorError> {
        let mut progress = run.checkpoint.progress.clone();
        let reason = EscalationReason::new(kind, run.checkpoint.state, progress.root_cause_summary(), detail);
        warn!(
            task_id = %run.checkpoint.task_id,
            kind = %kind,
            failure_point = %run.checkpoint.state,
            "{}",
            reason.describe()
        );
        let output = serde_json::to_value(&reason).unwrap_or(serde_json::Value::Null);
        progress.escalation = Some(reason);
        self.transition(run, TaskState::Escalated, cause, output, progress).await
    }

    /// Append the next checkpoint and mirror it onto the task status.
    async fn transition(
        &self,
        run: &mut Run,
        to: TaskState,
        cause: Option<RecordId>,
        output: serde_json::Value,
        progress: WorkflowProgress,
    ) -> Result<(), CoordinatorError> {
        let next = run.checkpoint.advance(to, cause, output, progress)?;
        let task_id = next.task_id;

        run.lease = self.leases.renew(&run.lease, self.lease_ttl()).await?;
        self.checkpoints.append(&next).await.map_err(|e| conflict(task_id, e))?;
        let escalation = if to == TaskState::Escalated {
            next.progress.escalation.clone()
        } else {
            None
        };
        self.tasks.update_status(task_id, to, escalation).await?;

        info!(
            task_id = %task_id,
            worker = %run.worker,
            from = %run.checkpoint.state,
            to = %to,
            sequence = next.sequence,
            "Task transitioned"
        );
        metrics::record_transition(to.as_str());
        self.event_bus.publish_task_event(TaskEvent::TaskTransitioned {
            task_id,
            from: run.checkpoint.state,
            to,
            sequence: next.sequence,
            transitioned_at: next.written_at,
        });
        run.checkpoint = next;
        Ok(())
    }

    /// Clerk summary and terminal event. Safe to repeat: the Clerk step is
    /// deduplicated by its invocation key.
    async fn finalize(&self, run: &Run) -> Result<(), CoordinatorError> {
        let task = self.load_task(run.checkpoint.task_id).await?;
        let mut summary_entry = None;

        if self.pool.has_role(AgentRole::Clerk) {
            let history = self.invocations.find_by_task(task.id).await?;
            let context = AgentContext::for_task(InvocationKey::for_step(task.id, STEP_SUMMARIZE), task.clone())
                .with_progress(run.checkpoint.progress.clone())
                .with_history(history);
            match self.pool.invoke(AgentRole::Clerk, &context).await {
                Ok(Invocation {
                    outcome: AgentOutcome::Success(Artifact::IncidentSummary(summary)),
                    ..
                }) => summary_entry = Some(summary.knowledge_entry_id),
                Ok(invocation) => {
                    warn!(task_id = %task.id, outcome = invocation.outcome.label(), "Clerk did not record a summary")
                }
                Err(e) => warn!(task_id = %task.id, error = %e, "Clerk invocation failed"),
            }
        }

        let now = Utc::now();
        match (&run.checkpoint.state, &run.checkpoint.progress.escalation) {
            (TaskState::Escalated, Some(reason)) => {
                metrics::record_task_outcome("escalated", reason.kind.as_str());
                self.event_bus.publish_task_event(TaskEvent::TaskEscalated {
                    task_id: task.id,
                    kind: reason.kind,
                    failure_point: reason.failure_point,
                    reason: reason.describe(),
                    escalated_at: now,
                });
            }
            _ => {
                metrics::record_task_outcome(run.checkpoint.state.as_str(), "none");
                self.event_bus.publish_task_event(TaskEvent::TaskResolved {
                    task_id: task.id,
                    summary_entry,
                    resolved_at: now,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Knowledge
    // ========================================================================

    /// SOPs and past incidents relevant to the task, handed to the Investigator.
    async fn knowledge_snapshot(&self, task: &Task) -> Result<Vec<KnowledgeEntry>, CoordinatorError> {
        let criteria = QueryCriteria {
            keywords: task.keywords(),
            services: vec![task.target.clone()],
            ..QueryCriteria::default()
        };
        let mut snapshot = Vec::new();
        for category in [KnowledgeCategory::Sop, KnowledgeCategory::HistoricalCase] {
            let query = KnowledgeQuery::category(category)
                .with_criteria(criteria.clone())
                .with_limit(self.settings.knowledge_snapshot_limit);
            snapshot.extend(self.knowledge.query(&query).await?.entries);
        }
        Ok(snapshot)
    }

    /// SOPs worth scoring for `root_cause`. Exact signature matches rank
    /// first so the limit never cuts them.
    async fn sop_candidates(&self, root_cause: &RootCauseHypothesis) -> Result<Vec<KnowledgeEntry>, CoordinatorError> {
        let query = KnowledgeQuery::category(KnowledgeCategory::Sop)
            .with_criteria(QueryCriteria {
                signatures: vec![root_cause.signature.clone()],
                keywords: root_cause.keywords.clone(),
                services: root_cause.affected_scope.clone(),
                ..QueryCriteria::default()
            })
            .with_limit(SOP_CANDIDATE_LIMIT);
        Ok(self.knowledge.query(&query).await?.entries)
    }
}

fn conflict(task_id: TaskId, err: RepositoryError) -> CoordinatorError {
    match err {
        RepositoryError::Conflict(detail) => CoordinatorError::CheckpointConflict { task_id, detail },
        other => CoordinatorError::Repository(other),
    }
}

/// Reason codes that name a specific escalation kind override the default.
fn escalation_kind(code: ReasonCode, default: EscalationKind) -> EscalationKind {
    match code {
        ReasonCode::AuthorizationDenied => EscalationKind::AuthorizationDenied,
        ReasonCode::MissingRootCause => EscalationKind::MissingRootCause,
        ReasonCode::VerificationFailed => EscalationKind::VerificationFailed,
        _ => default,
    }
}

fn report_json(report: &RemediationReport) -> serde_json::Value {
    serde_json::to_value(report).unwrap_or(serde_json::Value::Null)
}
