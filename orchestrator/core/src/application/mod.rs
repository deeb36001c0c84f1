// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_pool;
pub mod agents;
pub mod coordinator;
pub mod gateway;
pub mod ingress;
pub mod monitors;
pub mod orchestrator;
pub mod repository_factory;

// Re-export the services for convenience
pub use agent_pool::{AgentPool, Invocation};
pub use coordinator::{CoordinatorError, CoordinatorSettings, DeliveryOutcome, WorkflowCoordinator};
pub use gateway::{ExecutionGateway, GatewayError};
pub use ingress::{EventIngress, IngressError, SubmissionAck};
pub use monitors::{AnalystScheduler, SentinelMonitor};
pub use orchestrator::{Components, Orchestrator};
pub use repository_factory::Repositories;
