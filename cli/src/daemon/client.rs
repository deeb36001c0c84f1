// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use vigil_core::application::ingress::SubmissionAck;
use vigil_core::domain::checkpoint::Checkpoint;
use vigil_core::domain::execution::GatewayAuditEntry;
use vigil_core::domain::invocation::InvocationRecord;
use vigil_core::domain::knowledge::{KnowledgeEntry, KnowledgePage, KnowledgeStatistics};
use vigil_core::domain::task::{Task, TaskId};

use super::ClientTarget;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskView {
    pub task: Task,
    #[serde(default)]
    pub escalation_summary: Option<String>,
    #[serde(default)]
    pub latest_checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct CheckpointLog {
    checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, Deserialize)]
struct InvocationLog {
    invocations: Vec<InvocationRecord>,
}

#[derive(Debug, Deserialize)]
struct ActionLog {
    actions: Vec<GatewayAuditEntry>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    task: Task,
}

/// Filters for `GET /v1/knowledge`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
}

impl DaemonClient {
    pub fn new(target: &ClientTarget) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: target.base_url(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and decode the JSON body, surfacing the API's
    /// `{"error": ...}` message on failure.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, action: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to {} (is the daemon running?)", action))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(body);
            anyhow::bail!("Failed to {}: HTTP {}: {}", action, status, message);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response to {}", action))
    }

    pub async fn submit_trigger(&self, trigger: &serde_json::Value) -> Result<SubmissionAck> {
        let request = self.client.post(self.url("/v1/triggers")).json(trigger);
        self.send(request, "submit trigger").await
    }

    pub async fn list_tasks(&self, status: Option<&str>, limit: usize) -> Result<Vec<Task>> {
        let mut request = self
            .client
            .get(self.url("/v1/tasks"))
            .query(&[("limit", limit.to_string())]);
        if let Some(status) = status {
            request = request.query(&[("status", status)]);
        }
        let list: TaskList = self.send(request, "list tasks").await?;
        Ok(list.tasks)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<TaskView> {
        let request = self.client.get(self.url(&format!("/v1/tasks/{}", task_id)));
        self.send(request, "get task").await
    }

    pub async fn checkpoints(&self, task_id: TaskId) -> Result<Vec<Checkpoint>> {
        let request = self
            .client
            .get(self.url(&format!("/v1/tasks/{}/checkpoints", task_id)));
        let log: CheckpointLog = self.send(request, "get checkpoints").await?;
        Ok(log.checkpoints)
    }

    pub async fn invocations(&self, task_id: TaskId) -> Result<Vec<InvocationRecord>> {
        let request = self
            .client
            .get(self.url(&format!("/v1/tasks/{}/invocations", task_id)));
        let log: InvocationLog = self.send(request, "get invocations").await?;
        Ok(log.invocations)
    }

    pub async fn actions(&self, task_id: TaskId) -> Result<Vec<GatewayAuditEntry>> {
        let request = self
            .client
            .get(self.url(&format!("/v1/tasks/{}/actions", task_id)));
        let log: ActionLog = self.send(request, "get actions").await?;
        Ok(log.actions)
    }

    pub async fn cancel_task(&self, task_id: TaskId, reason: Option<String>) -> Result<Task> {
        let request = self
            .client
            .post(self.url(&format!("/v1/tasks/{}/cancel", task_id)))
            .json(&serde_json::json!({ "reason": reason }));
        let response: CancelResponse = self.send(request, "cancel task").await?;
        Ok(response.task)
    }

    pub async fn add_knowledge(&self, entry: &serde_json::Value) -> Result<KnowledgeEntry> {
        let request = self.client.post(self.url("/v1/knowledge")).json(entry);
        self.send(request, "add knowledge entry").await
    }

    pub async fn query_knowledge(&self, filter: &KnowledgeFilter) -> Result<KnowledgePage> {
        let request = self.client.get(self.url("/v1/knowledge")).query(filter);
        self.send(request, "query knowledge").await
    }

    pub async fn knowledge_stats(&self) -> Result<KnowledgeStatistics> {
        let request = self.client.get(self.url("/v1/knowledge/stats"));
        self.send(request, "get knowledge statistics").await
    }
}
