// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Clerk: incident summaries.
//!
//! Renders the summary of a finished task from its progress and invocation
//! history, stores it as the task's single `HistoricalCase` knowledge entry
//! and notifies stakeholders without waiting on delivery. Re-running the Clerk for a task returns the
//! entry stored the first time.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::agent::{Agent, AgentContext, AgentOutcome, Artifact, IncidentSummary, OutcomeReason, ReasonCode};
use crate::domain::invocation::{AgentRole, InvocationRecord};
use crate::domain::knowledge::{Applicability, Importance, KnowledgeCategory, KnowledgeEntry};
use crate::domain::notification::NotificationMessage;
use crate::domain::repository::KnowledgeRepository;
use crate::domain::task::{Priority, Task};
use crate::domain::workflow::WorkflowProgress;
use crate::infrastructure::notifier::NotificationDispatcher;
use crate::infrastructure::summary_template::{
    SummaryAction, SummaryCheck, SummaryContext, SummaryStep, SummaryTemplateEngine,
};

pub struct Clerk {
    knowledge: Arc<dyn KnowledgeRepository>,
    notifier: NotificationDispatcher,
    templates: SummaryTemplateEngine,
}

impl Clerk {
    pub fn new(
        knowledge: Arc<dyn KnowledgeRepository>,
        notifier: NotificationDispatcher,
        templates: SummaryTemplateEngine,
    ) -> Self {
        Self {
            knowledge,
            notifier,
            templates,
        }
    }
}

fn summary_context(task: &Task, progress: &WorkflowProgress, history: &[InvocationRecord]) -> SummaryContext {
    SummaryContext {
        task_id: task.id.to_string(),
        target: task.target.clone(),
        trigger: task.trigger.label(),
        priority: task.priority.to_string(),
        outcome: task.status.to_string(),
        root_cause: progress.root_cause_summary(),
        confidence: progress.root_cause.as_ref().map(|rc| format!("{:.2}", rc.confidence)),
        matched_sop: progress.matched_sop.as_ref().map(|m| m.title.clone()),
        actions: progress
            .remediation
            .iter()
            .flat_map(|r| &r.actions)
            .map(|a| SummaryAction {
                action_type: a.action_type.clone(),
                target: a.target.clone(),
                deduplicated: a.deduplicated,
            })
            .collect(),
        verification: progress
            .verification
            .iter()
            .map(|c| SummaryCheck {
                attempt: c.attempt,
                healthy: c.healthy,
                detail: c.detail.clone(),
            })
            .collect(),
        escalation: task.escalation.as_ref().or(progress.escalation.as_ref()).map(|e| e.describe()),
        timeline: history
            .iter()
            .map(|r| SummaryStep {
                role: r.role.to_string(),
                attempt: r.attempt,
                outcome: r.outcome.as_ref().map(|o| o.label()).unwrap_or("in_progress").to_string(),
                duration_ms: r.duration_ms,
            })
            .collect(),
        started_at: task.created_at.to_rfc3339(),
        finished_at: task.finished_at.unwrap_or(task.updated_at).to_rfc3339(),
    }
}

fn importance_for(priority: Priority) -> Importance {
    match priority {
        Priority::Urgent => Importance::Critical,
        Priority::High => Importance::High,
        Priority::Normal => Importance::Medium,
        Priority::Low => Importance::Low,
    }
}

#[async_trait]
impl Agent for Clerk {
    fn role(&self) -> AgentRole {
        AgentRole::Clerk
    }

    async fn handle(&self, context: &AgentContext) -> AgentOutcome {
        let Some(task) = context.task.as_ref() else {
            return AgentOutcome::Failure(OutcomeReason::new(ReasonCode::MissingContext, "no task in context"));
        };

        let summary = summary_context(task, &context.progress, &context.history);
        let body = match self.templates.render(&summary) {
            Ok(body) => body,
            Err(e) => return AgentOutcome::Failure(OutcomeReason::general(format!("{:#}", e))),
        };
        let headline = context
            .progress
            .root_cause_summary()
            .unwrap_or_else(|| task.trigger.label());
        let title = format!("[{}] {}: {}", task.status, task.target, headline);

        let mut applicability = Applicability {
            services: vec![task.target.clone()],
            ..Applicability::default()
        };
        if let Some(rc) = &context.progress.root_cause {
            applicability.signatures.push(rc.signature.clone());
            applicability.keywords = rc.keywords.clone();
        }
        let entry = KnowledgeEntry::new(KnowledgeCategory::HistoricalCase, title.clone(), body.clone())
            .with_applicability(applicability)
            .with_tags(["incident", task.status.as_str(), task.target.as_str()])
            .with_importance(importance_for(task.priority))
            .authored_by(AgentRole::Clerk.as_str())
            .for_task(task.id);

        let stored = match self.knowledge.insert_for_task(&entry).await {
            Ok(stored) => stored,
            Err(e) => return AgentOutcome::Failure(OutcomeReason::general(format!("failed to store summary: {}", e))),
        };
        if stored.id != entry.id {
            warn!(task_id = %task.id, entry_id = %stored.id, "Incident summary already recorded");
        }

        let message = NotificationMessage {
            task_id: task.id,
            subject: stored.title.clone(),
            body: stored.content.clone(),
            outcome: task.status.to_string(),
        };
        let dispatched_channels = self.notifier.dispatch(message);
        info!(
            task_id = %task.id,
            entry_id = %stored.id,
            channels = dispatched_channels.len(),
            "Incident summary recorded"
        );

        AgentOutcome::Success(Artifact::IncidentSummary(IncidentSummary {
            task_id: task.id,
            knowledge_entry_id: stored.id,
            title: stored.title,
            body: stored.content,
            dispatched_channels,
        }))
    }
}
