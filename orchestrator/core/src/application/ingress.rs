// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Ingress - Application Layer
//!
//! Turns raw trigger payloads (alerts, schedules, API submissions) into
//! [`Task`]s, persists them and hands them to the task queue.
//!
//! Accepted shapes, discriminated by `type`:
//!
//! ```json
//! {"type": "alert", "source": "alertmanager", "alert_name": "HighCpu",
//!  "target": "checkout", "severity": "critical",
//!  "metric": "cpu_usage", "value": 97.0, "threshold": 80.0}
//! {"type": "schedule", "job": "nightly-audit", "target": "payments"}
//! {"type": "api", "submitted_by": "alice", "target": "checkout", "priority": "high"}
//! ```
//!
//! Malformed triggers are logged and dropped: they are never persisted,
//! enqueued or retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::events::TaskEvent;
use crate::domain::queue::{MessageId, QueueError, TaskQueue};
use crate::domain::repository::{RepositoryError, TaskRepository};
use crate::domain::task::{Priority, Severity, Signal, Task, TaskId, TriggerSource};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("Malformed trigger: {0}")]
    MalformedTrigger(String),

    #[error("Failed to persist task: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to enqueue task: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub task_id: TaskId,
    pub message_id: MessageId,
    pub priority: Priority,
    pub accepted_at: DateTime<Utc>,
}

pub struct EventIngress {
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn TaskQueue>,
    event_bus: EventBus,
    alert_priority_threshold: Severity,
}

impl EventIngress {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn TaskQueue>,
        event_bus: EventBus,
        alert_priority_threshold: Severity,
    ) -> Self {
        Self {
            tasks,
            queue,
            event_bus,
            alert_priority_threshold,
        }
    }

    /// Validate a raw trigger and build the task it describes. Nothing is stored.
    pub fn normalize(&self, raw: &Value) -> Result<Task, IngressError> {
        let fields = raw
            .as_object()
            .ok_or_else(|| malformed("trigger must be a JSON object"))?;
        let kind = required_str(fields, "type")?;

        let (trigger, priority) = match kind.as_str() {
            "alert" => {
                let severity: Severity = required_str(fields, "severity")?
                    .parse()
                    .map_err(malformed)?;
                let trigger = TriggerSource::Alert {
                    source: required_str(fields, "source")?,
                    alert_name: required_str(fields, "alert_name")?,
                    severity,
                };
                (trigger, self.alert_priority(severity))
            }
            "schedule" => (
                TriggerSource::Schedule {
                    job: required_str(fields, "job")?,
                },
                Priority::Low,
            ),
            "api" => {
                let priority = match optional_str(fields, "priority")? {
                    Some(hint) => hint.parse().map_err(malformed)?,
                    None => Priority::Normal,
                };
                let trigger = TriggerSource::Api {
                    submitted_by: required_str(fields, "submitted_by")?,
                };
                (trigger, priority)
            }
            other => return Err(malformed(format!("unknown trigger type '{}'", other))),
        };

        let target = required_str(fields, "target")?;
        let signal = signal(fields)?;
        Ok(Task::new(trigger, target, signal, raw.clone(), priority))
    }

    /// Normalize, persist and enqueue a trigger.
    pub async fn submit(&self, raw: Value) -> Result<SubmissionAck, IngressError> {
        let task = match self.normalize(&raw) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Dropping malformed trigger");
                metrics::record_trigger_rejected();
                return Err(e);
            }
        };

        self.tasks.insert(&task).await?;
        let queued = self.queue.enqueue(task.id, task.priority).await?;

        info!(
            task_id = %task.id,
            trigger = %task.trigger.label(),
            target = %task.target,
            priority = %task.priority,
            message_id = %queued.message_id,
            "Task accepted"
        );
        metrics::record_task_submitted(task.trigger.kind().as_str(), task.priority.as_str());
        self.event_bus.publish_task_event(TaskEvent::TaskSubmitted {
            task_id: task.id,
            trigger: task.trigger.label(),
            priority: task.priority,
            submitted_at: task.created_at,
        });

        Ok(SubmissionAck {
            task_id: task.id,
            message_id: queued.message_id,
            priority: task.priority,
            accepted_at: queued.enqueued_at,
        })
    }

    fn alert_priority(&self, severity: Severity) -> Priority {
        if severity >= self.alert_priority_threshold {
            Priority::Urgent
        } else if Some(severity) == self.alert_priority_threshold.below() {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

fn malformed(reason: impl Into<String>) -> IngressError {
    IngressError::MalformedTrigger(reason.into())
}

fn optional_str(fields: &Map<String, Value>, name: &str) -> Result<Option<String>, IngressError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        Some(_) => Err(malformed(format!("field '{}' must be a non-empty string", name))),
    }
}

fn required_str(fields: &Map<String, Value>, name: &str) -> Result<String, IngressError> {
    optional_str(fields, name)?.ok_or_else(|| malformed(format!("missing required field '{}'", name)))
}

fn optional_f64(fields: &Map<String, Value>, name: &str) -> Result<Option<f64>, IngressError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| malformed(format!("field '{}' must be a number", name))),
    }
}

/// The metric to verify after remediation. A metric without a threshold
/// cannot be verified, so it is rejected.
fn signal(fields: &Map<String, Value>) -> Result<Option<Signal>, IngressError> {
    let metric = optional_str(fields, "metric")?;
    let threshold = optional_f64(fields, "threshold")?;
    let observed = optional_f64(fields, "value")?;
    match (metric, threshold) {
        (Some(metric), Some(threshold)) => Ok(Some(Signal { metric, threshold, observed })),
        (Some(metric), None) => Err(malformed(format!("metric '{}' has no threshold", metric))),
        (None, _) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::TaskState;
    use crate::infrastructure::queue::InMemoryTaskQueue;
    use crate::infrastructure::repositories::InMemoryTaskRepository;
    use serde_json::json;
    use std::time::Duration;

    fn ingress() -> (EventIngress, Arc<InMemoryTaskRepository>, Arc<InMemoryTaskQueue>) {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let queue = Arc::new(InMemoryTaskQueue::new(Duration::from_secs(30)));
        let ingress = EventIngress::new(tasks.clone(), queue.clone(), EventBus::new(16), Severity::Critical);
        (ingress, tasks, queue)
    }

    fn alert(severity: &str) -> Value {
        json!({
            "type": "alert",
            "source": "alertmanager",
            "alert_name": "HighCpu",
            "target": "checkout",
            "severity": severity,
            "metric": "cpu_usage",
            "value": 97.0,
            "threshold": 80.0
        })
    }

    #[test]
    fn alert_priority_follows_severity() {
        let (ingress, _, _) = ingress();
        assert_eq!(ingress.normalize(&alert("critical")).unwrap().priority, Priority::Urgent);
        assert_eq!(ingress.normalize(&alert("error")).unwrap().priority, Priority::High);
        assert_eq!(ingress.normalize(&alert("warning")).unwrap().priority, Priority::Normal);
    }

    #[test]
    fn alert_carries_signal_and_trigger() {
        let (ingress, _, _) = ingress();
        let task = ingress.normalize(&alert("critical")).unwrap();
        assert_eq!(task.target, "checkout");
        assert_eq!(task.status, TaskState::Queued);
        assert_eq!(task.trigger.label(), "alert:HighCpu");
        let signal = task.signal.unwrap();
        assert_eq!(signal.metric, "cpu_usage");
        assert_eq!(signal.threshold, 80.0);
        assert_eq!(signal.observed, Some(97.0));
    }

    #[test]
    fn schedule_and_api_triggers_are_normalized() {
        let (ingress, _, _) = ingress();
        let scheduled = ingress
            .normalize(&json!({"type": "schedule", "job": "nightly-audit", "target": "payments"}))
            .unwrap();
        assert_eq!(scheduled.priority, Priority::Low);
        assert!(scheduled.signal.is_none());

        let api = ingress
            .normalize(&json!({"type": "api", "submitted_by": "alice", "target": "checkout", "priority": "high"}))
            .unwrap();
        assert_eq!(api.priority, Priority::High);
        assert_eq!(api.trigger.label(), "api:alice");

        let default_priority = ingress
            .normalize(&json!({"type": "api", "submitted_by": "alice", "target": "checkout"}))
            .unwrap();
        assert_eq!(default_priority.priority, Priority::Normal);
    }

    #[test]
    fn malformed_triggers_are_rejected() {
        let (ingress, _, _) = ingress();
        let cases = [
            json!("not an object"),
            json!({"source": "x"}),
            json!({"type": "pager"}),
            json!({"type": "alert", "source": "am", "alert_name": "X", "target": "t", "severity": "loud"}),
            json!({"type": "alert", "source": "am", "alert_name": "X", "severity": "critical"}),
            json!({"type": "schedule", "target": "t"}),
            json!({"type": "api", "submitted_by": "a", "target": "t", "priority": "asap"}),
            json!({"type": "api", "submitted_by": "a", "target": "t", "metric": "cpu"}),
            json!({"type": "api", "submitted_by": "a", "target": "t", "metric": "cpu", "threshold": "high"}),
        ];
        for raw in cases {
            assert!(
                matches!(ingress.normalize(&raw), Err(IngressError::MalformedTrigger(_))),
                "accepted {}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn submit_persists_and_enqueues() {
        let (ingress, tasks, queue) = ingress();
        let ack = ingress.submit(alert("critical")).await.unwrap();
        assert_eq!(ack.priority, Priority::Urgent);

        let stored = tasks.find_by_id(ack.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskState::Queued);

        let delivery = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.task_id, ack.task_id);
        assert_eq!(delivery.message_id, ack.message_id);
    }

    #[tokio::test]
    async fn malformed_submission_is_dropped() {
        let (ingress, tasks, queue) = ingress();
        let result = ingress.submit(json!({"type": "alert"})).await;
        assert!(matches!(result, Err(IngressError::MalformedTrigger(_))));
        assert!(tasks.list(None, 10).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
