// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secure Execution Gateway
//!
//! The only path from an agent to the infrastructure. For every action the
//! gateway, in order:
//!
//! 1. validates the linked root-cause record (exists, finalized successful
//!    Investigator record of the same task);
//! 2. evaluates the least-privilege [`ExecutionPolicy`] for the action type,
//!    target and presented credential scope (default deny);
//! 3. returns the stored result when the idempotency key already executed;
//! 4. otherwise runs the action through the [`ActionExecutor`].
//!
//! Every decision is logged with the task id and root-cause record, appended
//! to the audit trail, counted and published on the event bus. Denials are
//! final: callers must not retry them.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::events::GatewayEvent;
use crate::domain::execution::{ActionDescriptor, ActionExecutor, ActionResult, GatewayAuditEntry, GatewayDecision};
use crate::domain::invocation::RecordId;
use crate::domain::policy::{CredentialScope, ExecutionPolicy};
use crate::domain::repository::{GatewayAuditRepository, InvocationRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Action denied: {reason}")]
    AuthorizationDenied { reason: String },

    #[error("Action has no valid root-cause record: {0}")]
    MissingRootCause(String),

    #[error("Action failed: {0}")]
    ExecutionFailed(String),

    #[error("Gateway store error: {0}")]
    Repository(#[from] RepositoryError),
}

pub struct ExecutionGateway {
    policy: ExecutionPolicy,
    invocations: Arc<dyn InvocationRepository>,
    audit: Arc<dyn GatewayAuditRepository>,
    executor: Arc<dyn ActionExecutor>,
    event_bus: EventBus,
}

impl ExecutionGateway {
    pub fn new(
        policy: ExecutionPolicy,
        invocations: Arc<dyn InvocationRepository>,
        audit: Arc<dyn GatewayAuditRepository>,
        executor: Arc<dyn ActionExecutor>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            policy,
            invocations,
            audit,
            executor,
            event_bus,
        }
    }

    pub async fn execute(&self, action: &ActionDescriptor, scope: &CredentialScope) -> Result<ActionResult, GatewayError> {
        let root_cause_record = match self.validate_root_cause(action).await? {
            Ok(record_id) => record_id,
            Err(reason) => {
                self.deny(action, scope, &reason).await?;
                return Err(GatewayError::MissingRootCause(reason));
            }
        };

        if let Err(violation) = self.policy.evaluate(&action.action_type, &action.target, scope) {
            let reason = violation.to_string();
            self.deny(action, scope, &reason).await?;
            return Err(GatewayError::AuthorizationDenied { reason });
        }

        info!(
            task_id = %action.task_id,
            root_cause_record = %root_cause_record,
            action_type = %action.action_type,
            target = %action.target,
            scope = %scope,
            "Action authorized"
        );
        self.event_bus.publish_gateway_event(GatewayEvent::ActionAuthorized {
            task_id: action.task_id,
            root_cause_record,
            action_type: action.action_type.clone(),
            target: action.target.clone(),
            authorized_at: Utc::now(),
        });

        let idempotency_key = action.idempotency_key();
        if let Some(mut previous) = self.audit.find_executed(&idempotency_key).await? {
            previous.deduplicated = true;
            info!(
                task_id = %action.task_id,
                root_cause_record = %root_cause_record,
                idempotency_key = %idempotency_key,
                "Action already executed, returning stored result"
            );
            self.record(action, scope, GatewayDecision::Deduplicated { result: previous.clone() })
                .await?;
            self.publish_executed(action, &previous);
            return Ok(previous);
        }

        match self.executor.execute(action).await {
            Ok(output) => {
                let result = ActionResult {
                    idempotency_key,
                    action_type: action.action_type.clone(),
                    target: action.target.clone(),
                    output: output.output,
                    deduplicated: false,
                    executed_at: Utc::now(),
                };
                info!(
                    task_id = %action.task_id,
                    root_cause_record = %root_cause_record,
                    idempotency_key = %result.idempotency_key,
                    "Action executed"
                );
                self.record(action, scope, GatewayDecision::Executed { result: result.clone() })
                    .await?;
                self.publish_executed(action, &result);
                Ok(result)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    task_id = %action.task_id,
                    root_cause_record = %root_cause_record,
                    idempotency_key = %idempotency_key,
                    error = %reason,
                    "Action failed"
                );
                self.record(action, scope, GatewayDecision::Failed { reason: reason.clone() })
                    .await?;
                self.event_bus.publish_gateway_event(GatewayEvent::ActionFailed {
                    task_id: action.task_id,
                    idempotency_key,
                    action_type: action.action_type.clone(),
                    error: reason.clone(),
                    failed_at: Utc::now(),
                });
                Err(GatewayError::ExecutionFailed(reason))
            }
        }
    }

    /// Inner `Err` carries the denial reason.
    async fn validate_root_cause(&self, action: &ActionDescriptor) -> Result<Result<RecordId, String>, GatewayError> {
        let Some(record_id) = action.root_cause_record else {
            return Ok(Err("no root-cause record referenced".to_string()));
        };
        let Some(record) = self.invocations.find_by_id(record_id).await? else {
            return Ok(Err(format!("root-cause record {} does not exist", record_id)));
        };
        if record.task_id != Some(action.task_id) {
            return Ok(Err(format!("root-cause record {} belongs to another task", record_id)));
        }
        if !record.is_root_cause_record() {
            return Ok(Err(format!(
                "record {} is not a finalized successful investigator record",
                record_id
            )));
        }
        Ok(Ok(record_id))
    }

    async fn deny(&self, action: &ActionDescriptor, scope: &CredentialScope, reason: &str) -> Result<(), GatewayError> {
        warn!(
            task_id = %action.task_id,
            root_cause_record = ?action.root_cause_record,
            action_type = %action.action_type,
            target = %action.target,
            scope = %scope,
            reason = %reason,
            "Action denied"
        );
        self.record(action, scope, GatewayDecision::Denied { reason: reason.to_string() })
            .await?;
        self.event_bus.publish_gateway_event(GatewayEvent::ActionDenied {
            task_id: action.task_id,
            root_cause_record: action.root_cause_record,
            action_type: action.action_type.clone(),
            target: action.target.clone(),
            reason: reason.to_string(),
            denied_at: Utc::now(),
        });
        Ok(())
    }

    async fn record(
        &self,
        action: &ActionDescriptor,
        scope: &CredentialScope,
        decision: GatewayDecision,
    ) -> Result<(), GatewayError> {
        metrics::record_gateway_decision(decision.label());
        let entry = GatewayAuditEntry::new(action, scope.as_str(), decision);
        self.audit.record(&entry).await?;
        Ok(())
    }

    fn publish_executed(&self, action: &ActionDescriptor, result: &ActionResult) {
        self.event_bus.publish_gateway_event(GatewayEvent::ActionExecuted {
            task_id: action.task_id,
            idempotency_key: result.idempotency_key.clone(),
            action_type: action.action_type.clone(),
            deduplicated: result.deduplicated,
            executed_at: result.executed_at,
        });
    }
}
