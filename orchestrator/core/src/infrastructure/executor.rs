// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Action Executors
//
// The only components that touch infrastructure. They are reachable solely
// through the execution gateway, which has already authorized and audited
// the action.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::config::ExecutorConfig;
use crate::domain::execution::{ActionDescriptor, ActionExecutor, ActionOutput, ExecutorError};

pub fn build_executor(config: &ExecutorConfig) -> Result<Arc<dyn ActionExecutor>, ExecutorError> {
    match config {
        ExecutorConfig::DryRun => Ok(Arc::new(DryRunExecutor::new())),
        ExecutorConfig::Http { endpoint, token, timeout } => {
            Ok(Arc::new(HttpActionExecutor::new(endpoint.clone(), token.clone(), *timeout)?))
        }
    }
}

/// Logs actions instead of running them and remembers what it was asked to do.
#[derive(Default)]
pub struct DryRunExecutor {
    executed: Mutex<Vec<ActionDescriptor>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<ActionDescriptor> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, action: &ActionDescriptor) -> Result<ActionOutput, ExecutorError> {
        info!(
            task_id = %action.task_id,
            action_type = %action.action_type,
            target = %action.target,
            idempotency_key = %action.idempotency_key(),
            "Dry run: action not executed"
        );
        self.executed.lock().push(action.clone());
        Ok(ActionOutput {
            output: serde_json::json!({ "dry_run": true }),
        })
    }
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    idempotency_key: String,
    task_id: String,
    action_type: &'a str,
    target: &'a str,
    parameters: &'a serde_json::Value,
}

/// POSTs actions to an automation endpoint (runbook runner, Rundeck-like
/// job API). The idempotency key travels in the `Idempotency-Key` header so
/// the endpoint can drop duplicates as well.
pub struct HttpActionExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpActionExecutor {
    pub fn new(endpoint: String, token: Option<String>, timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, endpoint, token })
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn execute(&self, action: &ActionDescriptor) -> Result<ActionOutput, ExecutorError> {
        let idempotency_key = action.idempotency_key();
        let body = ActionRequest {
            idempotency_key: idempotency_key.clone(),
            task_id: action.task_id.to_string(),
            action_type: &action.action_type,
            target: &action.target,
            parameters: &action.parameters,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", idempotency_key)
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(ExecutorError::Rejected(format!("HTTP {}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(ExecutorError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let output = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };
        Ok(ActionOutput { output })
    }
}
