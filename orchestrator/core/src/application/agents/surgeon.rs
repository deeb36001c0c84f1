// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Surgeon: applies the matched SOP through the execution gateway, then
//! probes the target. Success requires a healthy probe.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::gateway::{ExecutionGateway, GatewayError};
use crate::domain::agent::{
    Agent, AgentContext, AgentOutcome, Artifact, OutcomeReason, ReasonCode, RemediationReport,
};
use crate::domain::execution::ActionDescriptor;
use crate::domain::invocation::AgentRole;
use crate::domain::policy::CredentialScope;
use crate::domain::telemetry::HealthProbe;

pub struct Surgeon {
    gateway: Arc<ExecutionGateway>,
    health_probe: Arc<dyn HealthProbe>,
}

impl Surgeon {
    pub fn new(gateway: Arc<ExecutionGateway>, health_probe: Arc<dyn HealthProbe>) -> Self {
        Self { gateway, health_probe }
    }
}

#[async_trait]
impl Agent for Surgeon {
    fn role(&self) -> AgentRole {
        AgentRole::Surgeon
    }

    async fn handle(&self, context: &AgentContext) -> AgentOutcome {
        let Some(task) = context.task.as_ref() else {
            return AgentOutcome::Failure(OutcomeReason::new(ReasonCode::MissingContext, "no task in context"));
        };
        let Some(root_cause_record) = context.progress.investigator_record else {
            return AgentOutcome::NeedsEscalation(OutcomeReason::new(
                ReasonCode::MissingRootCause,
                "no finalized investigator record to act on",
            ));
        };
        let Some(matched) = context.progress.matched_sop.as_ref() else {
            return AgentOutcome::Failure(OutcomeReason::new(ReasonCode::MissingContext, "no SOP selected"));
        };
        let Some(sop) = context.knowledge.iter().find(|k| k.id == matched.entry_id) else {
            return AgentOutcome::Failure(OutcomeReason::new(
                ReasonCode::MissingContext,
                format!("SOP {} missing from the knowledge snapshot", matched.entry_id),
            ));
        };
        let Some(procedure) = sop.procedure.as_ref() else {
            return AgentOutcome::Failure(OutcomeReason::new(
                ReasonCode::MissingContext,
                format!("SOP '{}' has no procedure", sop.title),
            ));
        };

        let scope = CredentialScope::new(procedure.credential_scope.clone());
        let mut actions = Vec::with_capacity(procedure.steps.len());
        for (index, step) in procedure.steps.iter().enumerate() {
            let action = ActionDescriptor {
                task_id: task.id,
                root_cause_record: Some(root_cause_record),
                invocation_key: context.invocation_key,
                step_index: index as u32,
                action_type: step.action_type.clone(),
                target: step.target.clone().unwrap_or_else(|| task.target.clone()),
                parameters: step.parameters.clone(),
            };
            match self.gateway.execute(&action, &scope).await {
                Ok(result) => actions.push(result),
                Err(GatewayError::AuthorizationDenied { reason }) => {
                    return AgentOutcome::NeedsEscalation(OutcomeReason::new(ReasonCode::AuthorizationDenied, reason));
                }
                Err(GatewayError::MissingRootCause(reason)) => {
                    return AgentOutcome::NeedsEscalation(OutcomeReason::new(ReasonCode::MissingRootCause, reason));
                }
                Err(GatewayError::ExecutionFailed(reason)) => {
                    return AgentOutcome::Failure(OutcomeReason::new(
                        ReasonCode::ActionFailed,
                        format!("step {} ({}) failed: {}", index, step.action_type, reason),
                    ));
                }
                Err(e @ GatewayError::Repository(_)) => {
                    return AgentOutcome::Failure(OutcomeReason::general(e.to_string()));
                }
            }
        }
        info!(task_id = %task.id, sop = %sop.title, actions = actions.len(), "SOP applied");

        let signal = task.signal.as_ref();
        let health = match self
            .health_probe
            .check(&task.target, signal.map(|s| s.metric.as_str()), signal.map(|s| s.threshold))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Health probe unavailable");
                return AgentOutcome::Failure(OutcomeReason::new(
                    ReasonCode::VerificationFailed,
                    format!("health probe unavailable: {}", e),
                ));
            }
        };
        if !health.healthy {
            return AgentOutcome::Failure(OutcomeReason::new(
                ReasonCode::VerificationFailed,
                format!("target unhealthy after remediation: {}", health.detail),
            ));
        }

        AgentOutcome::Success(Artifact::Remediation(RemediationReport {
            sop_id: sop.id,
            sop_title: sop.title.clone(),
            actions,
            health: Some(health),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::RootCauseHypothesis;
    use crate::domain::execution::ActionExecutor;
    use crate::domain::invocation::{InvocationKey, InvocationOutcome, InvocationRecord, RecordId};
    use crate::domain::knowledge::{ActionStep, KnowledgeCategory, KnowledgeEntry, Procedure, SopMatch};
    use crate::domain::policy::{ExecutionPolicy, PolicyRule};
    use crate::domain::repository::InvocationRepository;
    use crate::domain::task::{Priority, Signal, Task, TriggerSource};
    use crate::domain::workflow::WorkflowProgress;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::executor::DryRunExecutor;
    use crate::infrastructure::repositories::{InMemoryGatewayAuditRepository, InMemoryInvocationRepository};
    use crate::infrastructure::telemetry::{StaticTelemetrySource, TelemetryHealthProbe};

    struct Fixture {
        surgeon: Surgeon,
        executor: Arc<DryRunExecutor>,
        context: AgentContext,
    }

    async fn fixture(rules: Vec<PolicyRule>, post_value: f64) -> Fixture {
        let invocations = Arc::new(InMemoryInvocationRepository::new());
        let executor = Arc::new(DryRunExecutor::new());
        let gateway = Arc::new(ExecutionGateway::new(
            ExecutionPolicy::new(rules),
            invocations.clone(),
            Arc::new(InMemoryGatewayAuditRepository::new()),
            executor.clone() as Arc<dyn ActionExecutor>,
            EventBus::new(16),
        ));
        let telemetry = Arc::new(StaticTelemetrySource::new().with_metric("cpu_usage", "checkout", vec![post_value]));
        let probe = Arc::new(TelemetryHealthProbe::new(telemetry, None));

        let task = Task::new(
            TriggerSource::Api { submitted_by: "test".into() },
            "checkout",
            Some(Signal { metric: "cpu_usage".into(), threshold: 80.0, observed: Some(97.0) }),
            serde_json::Value::Null,
            Priority::High,
        );
        let mut record = InvocationRecord::start(
            InvocationKey::for_step(task.id, "investigate"),
            Some(task.id),
            AgentRole::Investigator,
            1,
            serde_json::Value::Null,
        );
        invocations.begin(&record).await.unwrap();
        let hypothesis = RootCauseHypothesis {
            summary: "cpu".into(),
            signature: "cpu_usage:checkout".into(),
            keywords: vec![],
            confidence: 0.9,
            affected_scope: vec!["checkout".into()],
            evidence: vec![],
        };
        record
            .finalize(InvocationOutcome::Completed {
                outcome: AgentOutcome::Success(Artifact::RootCause(hypothesis.clone())),
            })
            .unwrap();
        invocations.finalize(&record).await.unwrap();

        let sop = KnowledgeEntry::new(KnowledgeCategory::Sop, "Restart checkout", "restart then flush")
            .with_procedure(Procedure {
                steps: vec![
                    ActionStep {
                        action_type: "service.restart".into(),
                        target: None,
                        parameters: serde_json::json!({ "graceful": true }),
                    },
                    ActionStep {
                        action_type: "cache.flush".into(),
                        target: Some("checkout-cache".into()),
                        parameters: serde_json::Value::Null,
                    },
                ],
                credential_scope: "remediation:restart".into(),
            });
        let progress = WorkflowProgress {
            root_cause: Some(hypothesis),
            investigator_record: Some(record.id),
            matched_sop: Some(SopMatch { entry_id: sop.id, title: sop.title.clone(), score: 1.0, exact: true }),
            ..WorkflowProgress::default()
        };
        let context = AgentContext::for_task(InvocationKey::for_step(task.id, "remediate"), task)
            .with_knowledge(vec![sop])
            .with_progress(progress);
        Fixture {
            surgeon: Surgeon::new(gateway, probe),
            executor,
            context,
        }
    }

    fn permissive() -> Vec<PolicyRule> {
        vec![
            PolicyRule::new("service.*", vec!["remediation:restart".into()]),
            PolicyRule::new("cache.flush", vec!["remediation:restart".into()]),
        ]
    }

    #[tokio::test]
    async fn applies_every_step_and_reports_health() {
        let f = fixture(permissive(), 41.0).await;
        let outcome = f.surgeon.handle(&f.context).await;
        let AgentOutcome::Success(Artifact::Remediation(report)) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(report.actions.len(), 2);
        assert!(report.health.unwrap().healthy);
        let executed = f.executor.executed();
        assert_eq!(executed[0].target, "checkout");
        assert_eq!(executed[1].target, "checkout-cache");
        assert_eq!(executed[1].step_index, 1);
    }

    #[tokio::test]
    async fn denial_needs_escalation() {
        let rules = vec![PolicyRule::new("service.*", vec!["remediation:restart".into()])];
        let f = fixture(rules, 41.0).await;
        let outcome = f.surgeon.handle(&f.context).await;
        assert_eq!(outcome.label(), "needs_escalation");
        assert_eq!(outcome.reason().unwrap().code, ReasonCode::AuthorizationDenied);
        // The first step was authorized and ran before the denial
        assert_eq!(f.executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn unhealthy_probe_is_a_verification_failure() {
        let f = fixture(permissive(), 95.0).await;
        let outcome = f.surgeon.handle(&f.context).await;
        assert_eq!(outcome.label(), "failure");
        assert_eq!(outcome.reason().unwrap().code, ReasonCode::VerificationFailed);
    }

    #[tokio::test]
    async fn refuses_without_investigator_record() {
        let mut f = fixture(permissive(), 41.0).await;
        f.context.progress.investigator_record = None;
        let outcome = f.surgeon.handle(&f.context).await;
        assert_eq!(outcome.reason().unwrap().code, ReasonCode::MissingRootCause);
        assert!(f.executor.executed().is_empty());

        f.context.progress.investigator_record = Some(RecordId::new());
        let outcome = f.surgeon.handle(&f.context).await;
        assert_eq!(outcome.reason().unwrap().code, ReasonCode::MissingRootCause);
        assert!(f.executor.executed().is_empty());
    }
}
