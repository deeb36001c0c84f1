// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /v1/triggers` | Submit a raw trigger (`202`, `400` when malformed) |
//! | `GET /v1/tasks` | Recent tasks, optionally filtered by `status` |
//! | `GET /v1/tasks/{id}` | Task with its latest checkpoint |
//! | `GET /v1/tasks/{id}/checkpoints` | Full checkpoint log |
//! | `GET /v1/tasks/{id}/invocations` | Agent invocation history |
//! | `GET /v1/tasks/{id}/actions` | Execution gateway audit trail |
//! | `POST /v1/tasks/{id}/cancel` | Request cancellation (`409` when terminal) |
//! | `GET /v1/knowledge` | Ranked knowledge query with a restart cursor |
//! | `POST /v1/knowledge` | Add an operator-curated entry |
//! | `PUT /v1/knowledge/{id}` | Curate an existing entry |
//! | `GET /v1/knowledge/stats` | Entry counts per category |
//! | `GET /health` | Liveness and queue depth |

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::application::coordinator::{CoordinatorError, WorkflowCoordinator};
use crate::application::ingress::{EventIngress, IngressError};
use crate::application::orchestrator::Orchestrator;
use crate::application::repository_factory::Repositories;
use crate::domain::knowledge::{
    Applicability, Importance, KnowledgeCategory, KnowledgeEntry, KnowledgeEntryId, KnowledgeQuery, Procedure,
    QueryCriteria,
};
use crate::domain::repository::RepositoryError;
use crate::domain::task::TaskId;
use crate::domain::workflow::TaskState;

#[derive(Clone)]
pub struct ApiState {
    pub ingress: Arc<EventIngress>,
    pub coordinator: Arc<WorkflowCoordinator>,
    pub repositories: Repositories,
    pub started_at: Instant,
}

impl ApiState {
    pub fn from_orchestrator(orchestrator: &Orchestrator) -> Self {
        Self {
            ingress: orchestrator.ingress.clone(),
            coordinator: orchestrator.coordinator.clone(),
            repositories: orchestrator.repositories.clone(),
            started_at: Instant::now(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/triggers", post(submit_trigger_handler))
        .route("/v1/tasks", get(list_tasks_handler))
        .route("/v1/tasks/{id}", get(get_task_handler))
        .route("/v1/tasks/{id}/checkpoints", get(checkpoints_handler))
        .route("/v1/tasks/{id}/invocations", get(invocations_handler))
        .route("/v1/tasks/{id}/actions", get(actions_handler))
        .route("/v1/tasks/{id}/cancel", post(cancel_task_handler))
        .route("/v1/knowledge", get(query_knowledge_handler).post(add_knowledge_handler))
        .route("/v1/knowledge/stats", get(knowledge_stats_handler))
        .route("/v1/knowledge/{id}", put(curate_knowledge_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => {
                error!(error = %m, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            RepositoryError::Conflict(detail) => ApiError::Conflict(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IngressError> for ApiError {
    fn from(err: IngressError) -> Self {
        match err {
            e @ IngressError::MalformedTrigger(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::TaskNotFound(id) => ApiError::NotFound(format!("task {} not found", id)),
            CoordinatorError::Repository(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

type AppState = State<Arc<ApiState>>;

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a valid task id", raw)))
}

async fn require_task(state: &ApiState, id: TaskId) -> Result<crate::domain::task::Task, ApiError> {
    state
        .repositories
        .tasks
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))
}

async fn health_handler(State(state): AppState) -> Json<Value> {
    let queue_depth = state.repositories.queue.depth().await.ok();
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "queue_depth": queue_depth,
    }))
}

async fn submit_trigger_handler(State(state): AppState, Json(raw): Json<Value>) -> Result<Response, ApiError> {
    let ack = state.ingress.submit(raw).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)).into_response())
}

#[derive(Debug, Deserialize)]
struct TaskListParams {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_tasks_handler(State(state): AppState, Query(params): Query<TaskListParams>) -> Result<Json<Value>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<TaskState>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let tasks = state.repositories.tasks.list(status, params.limit.unwrap_or(50)).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn get_task_handler(State(state): AppState, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_task_id(&id)?;
    let task = require_task(&state, id).await?;
    let checkpoint = state.repositories.checkpoints.latest(id).await?;
    Ok(Json(json!({
        "task": task,
        "escalation_summary": task.escalation.as_ref().map(|e| e.describe()),
        "latest_checkpoint": checkpoint,
    })))
}

async fn checkpoints_handler(State(state): AppState, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_task_id(&id)?;
    require_task(&state, id).await?;
    let checkpoints = state.repositories.checkpoints.history(id).await?;
    Ok(Json(json!({ "task_id": id, "checkpoints": checkpoints })))
}

async fn invocations_handler(State(state): AppState, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_task_id(&id)?;
    require_task(&state, id).await?;
    let invocations = state.repositories.invocations.find_by_task(id).await?;
    Ok(Json(json!({ "task_id": id, "invocations": invocations })))
}

async fn actions_handler(State(state): AppState, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_task_id(&id)?;
    require_task(&state, id).await?;
    let actions = state.repositories.audit.find_by_task(id).await?;
    Ok(Json(json!({ "task_id": id, "actions": actions })))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_task_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Response, ApiError> {
    let id = parse_task_id(&id)?;
    let existing = require_task(&state, id).await?;
    if existing.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "task {} is already {}",
            id, existing.status
        )));
    }
    let reason = request.reason.unwrap_or_else(|| "cancelled by operator".to_string());
    let task = state.coordinator.request_cancellation(id, reason).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task": task }))).into_response())
}

#[derive(Debug, Deserialize)]
struct KnowledgeParams {
    category: Option<String>,
    /// Free-text keywords.
    q: Option<String>,
    /// Comma-separated services.
    service: Option<String>,
    /// Comma-separated tags, all required.
    tag: Option<String>,
    min_importance: Option<Importance>,
    limit: Option<usize>,
    cursor: Option<usize>,
}

fn split_list(raw: Option<&str>, separator: char) -> Vec<String> {
    raw.map(|s| {
        s.split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

async fn query_knowledge_handler(
    State(state): AppState,
    Query(params): Query<KnowledgeParams>,
) -> Result<Json<Value>, ApiError> {
    let category = params
        .category
        .as_deref()
        .map(str::parse::<KnowledgeCategory>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let query = KnowledgeQuery {
        category,
        criteria: QueryCriteria {
            keywords: split_list(params.q.as_deref(), ' '),
            services: split_list(params.service.as_deref(), ','),
            tags: split_list(params.tag.as_deref(), ','),
            min_importance: params.min_importance,
            ..QueryCriteria::default()
        },
        cursor: params.cursor,
        limit: params.limit.unwrap_or(20),
    };
    let page = state.repositories.knowledge.query(&query).await?;
    Ok(Json(serde_json::to_value(page).map_err(|e| ApiError::Internal(e.to_string()))?))
}

/// Operator-supplied knowledge entry.
#[derive(Debug, Deserialize)]
pub struct KnowledgeEntryRequest {
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub applicability: Applicability,
    #[serde(default)]
    pub procedure: Option<Procedure>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl KnowledgeEntryRequest {
    fn into_entry(self) -> Result<KnowledgeEntry, ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::BadRequest("title must not be empty".into()));
        }
        if self.category == KnowledgeCategory::Sop && self.procedure.as_ref().map_or(true, |p| p.steps.is_empty()) {
            return Err(ApiError::BadRequest("an SOP needs a procedure with at least one step".into()));
        }
        let mut entry = KnowledgeEntry::new(self.category, self.title, self.content)
            .with_applicability(self.applicability)
            .with_tags(self.tags)
            .with_importance(self.importance)
            .authored_by(self.author.unwrap_or_else(|| "operator".to_string()));
        entry.procedure = self.procedure;
        entry.expires_at = self.expires_at;
        Ok(entry)
    }
}

async fn add_knowledge_handler(
    State(state): AppState,
    Json(request): Json<KnowledgeEntryRequest>,
) -> Result<Response, ApiError> {
    let entry = request.into_entry()?;
    state.repositories.knowledge.insert(&entry).await?;
    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

async fn curate_knowledge_handler(
    State(state): AppState,
    Path(id): Path<String>,
    Json(request): Json<KnowledgeEntryRequest>,
) -> Result<Json<KnowledgeEntry>, ApiError> {
    let id = id
        .parse::<uuid::Uuid>()
        .map(KnowledgeEntryId)
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a valid knowledge entry id", id)))?;
    let mut entry = request.into_entry()?;
    entry.id = id;
    Ok(Json(state.repositories.knowledge.curate(&entry).await?))
}

async fn knowledge_stats_handler(State(state): AppState) -> Result<Json<Value>, ApiError> {
    let stats = state.repositories.knowledge.statistics().await?;
    Ok(Json(serde_json::to_value(stats).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::OrchestratorConfigManifest;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, ApiState) {
        let manifest = OrchestratorConfigManifest::default();
        let orchestrator = Orchestrator::from_config(&manifest.spec).await.unwrap();
        let state = ApiState::from_orchestrator(&orchestrator);
        (router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn alert() -> Value {
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

    #[tokio::test]
    async fn accepted_trigger_is_inspectable() {
        let (app, _) = app().await;
        let (status, ack) = send(&app, "POST", "/v1/triggers", Some(alert())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(ack["priority"], "urgent");

        let task_id = ack["task_id"].as_str().unwrap().to_string();
        let (status, body) = send(&app, "GET", &format!("/v1/tasks/{}", task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["status"], "queued");
        assert_eq!(body["task"]["target"], "checkout");

        let (status, body) = send(&app, "GET", &format!("/v1/tasks/{}/checkpoints", task_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["checkpoints"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_trigger_is_rejected() {
        let (app, state) = app().await;
        let (status, body) = send(&app, "POST", "/v1/triggers", Some(json!({ "type": "alert", "target": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Malformed trigger"));
        assert_eq!(state.repositories.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_and_invalid_task_ids() {
        let (app, _) = app().await;
        let (status, _) = send(&app, "GET", &format!("/v1/tasks/{}", TaskId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", "/v1/tasks/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancellation_of_live_and_terminal_tasks() {
        let (app, state) = app().await;
        let (_, ack) = send(&app, "POST", "/v1/triggers", Some(alert())).await;
        let task_id = ack["task_id"].as_str().unwrap().to_string();

        let uri = format!("/v1/tasks/{}/cancel", task_id);
        let (status, body) = send(&app, "POST", &uri, Some(json!({ "reason": "false alarm" }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["task"]["cancellation"]["reason"], "false alarm");

        let id: TaskId = task_id.parse().unwrap();
        state
            .repositories
            .tasks
            .update_status(id, TaskState::Resolved, None)
            .await
            .unwrap();
        let (status, _) = send(&app, "POST", &uri, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn knowledge_can_be_added_and_queried() {
        let (app, _) = app().await;
        let sop = json!({
            "category": "sop",
            "title": "Restart checkout on CPU saturation",
            "content": "Restart the checkout deployment.",
            "applicability": { "signatures": ["cpu_usage:checkout"], "services": ["checkout"] },
            "procedure": {
                "steps": [{ "action_type": "service.restart" }],
                "credential_scope": "remediation:restart"
            },
            "tags": ["cpu"]
        });
        let (status, created) = send(&app, "POST", "/v1/knowledge", Some(sop)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["author"], "operator");

        let (status, page) = send(&app, "GET", "/v1/knowledge?category=sop&service=checkout&tag=cpu", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["entries"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/v1/knowledge?category=recipes", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let no_steps = json!({ "category": "sop", "title": "Empty", "content": "" });
        let (status, _) = send(&app, "POST", "/v1/knowledge", Some(no_steps)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, stats) = send(&app, "GET", "/v1/knowledge/stats", None).await;
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn health_reports_queue_depth() {
        let (app, _) = app().await;
        send(&app, "POST", "/v1/triggers", Some(alert())).await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["queue_depth"], 1);
    }
}
