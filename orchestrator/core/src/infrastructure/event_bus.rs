// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming using tokio broadcast channels. Feeds log
// observers and tests; events are not persisted (checkpoints and invocation
// records are the durable history).

use crate::domain::events::{AgentEvent, GatewayEvent, TaskEvent};
use crate::domain::task::TaskId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Task(TaskEvent),
    Agent(AgentEvent),
    Gateway(GatewayEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity determines how many events can be buffered before slow
    /// receivers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    pub fn publish_agent_event(&self, event: AgentEvent) {
        self.publish(DomainEvent::Agent(event));
    }

    pub fn publish_gateway_event(&self, event: GatewayEvent) {
        self.publish(DomainEvent::Gateway(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Subscribe to the task events of a single task
    pub fn subscribe_task(&self, task_id: TaskId) -> TaskEventReceiver {
        let receiver = self.sender.subscribe();
        TaskEventReceiver { receiver, task_id }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for the task events of one task (filtered)
pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    task_id: TaskId,
}

impl TaskEventReceiver {
    pub async fn recv(&mut self) -> Result<TaskEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Task(task_event) = event {
                if task_event.task_id() == self.task_id {
                    return Ok(task_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Priority;
    use crate::domain::workflow::TaskState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let task_id = TaskId::new();

        event_bus.publish_task_event(TaskEvent::TaskSubmitted {
            task_id,
            trigger: "alert:HighCpu".to_string(),
            priority: Priority::Urgent,
            submitted_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Task(TaskEvent::TaskSubmitted { task_id: id, priority, .. }) => {
                assert_eq!(id, task_id);
                assert_eq!(priority, Priority::Urgent);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_task_event_filtering() {
        let event_bus = EventBus::new(10);
        let task_id = TaskId::new();
        let mut receiver = event_bus.subscribe_task(task_id);

        event_bus.publish_task_event(TaskEvent::TaskTransitioned {
            task_id: TaskId::new(),
            from: TaskState::Queued,
            to: TaskState::Investigating,
            sequence: 1,
            transitioned_at: Utc::now(),
        });
        event_bus.publish_task_event(TaskEvent::TaskTransitioned {
            task_id,
            from: TaskState::Queued,
            to: TaskState::Investigating,
            sequence: 1,
            transitioned_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.task_id(), task_id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_task_event(TaskEvent::CancellationRequested {
            task_id: TaskId::new(),
            reason: "maintenance window".to_string(),
            requested_at: Utc::now(),
        });

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }
}
