// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator assembly.
//!
//! Wires the repositories, infrastructure adapters, agents and services of
//! one VIGIL node from an [`OrchestratorConfigSpec`]. Tests build the same
//! graph from hand-made [`Components`] with [`Orchestrator::assemble`].

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::agent_pool::AgentPool;
use crate::application::agents::{Analyst, Clerk, Investigator, Sentinel, Surgeon};
use crate::application::coordinator::{CoordinatorSettings, WorkflowCoordinator};
use crate::application::gateway::ExecutionGateway;
use crate::application::ingress::EventIngress;
use crate::application::monitors::{AnalystScheduler, SentinelMonitor};
use crate::application::repository_factory::Repositories;
use crate::domain::config::OrchestratorConfigSpec;
use crate::domain::execution::ActionExecutor;
use crate::domain::telemetry::{HealthProbe, TelemetrySource};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::executor::build_executor;
use crate::infrastructure::notifier::NotificationDispatcher;
use crate::infrastructure::summary_template::SummaryTemplateEngine;
use crate::infrastructure::telemetry::{build_health_probe, build_telemetry_source};

/// Adapters the orchestrator is built from.
pub struct Components {
    pub repositories: Repositories,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub health_probe: Arc<dyn HealthProbe>,
    pub executor: Arc<dyn ActionExecutor>,
    pub notifier: NotificationDispatcher,
    pub templates: SummaryTemplateEngine,
}

impl Components {
    /// Build every adapter named in the config. Connects to and migrates
    /// PostgreSQL when that backend is selected.
    pub async fn from_config(spec: &OrchestratorConfigSpec) -> Result<Self> {
        let backend = spec.storage.to_backend()?;
        let repositories = Repositories::connect(&backend, spec.queue.visibility_timeout).await?;
        let telemetry = build_telemetry_source(&spec.telemetry).context("Failed to build telemetry source")?;
        let health_probe =
            build_health_probe(&spec.health_probe, telemetry.clone()).context("Failed to build health probe")?;
        let executor = build_executor(&spec.gateway.executor).context("Failed to build action executor")?;
        let notifier =
            NotificationDispatcher::from_config(&spec.notifications).context("Failed to build notifiers")?;
        let templates = SummaryTemplateEngine::from_path(spec.clerk.template_path.as_deref())?;

        Ok(Self {
            repositories,
            telemetry,
            health_probe,
            executor,
            notifier,
            templates,
        })
    }
}

pub struct Orchestrator {
    pub repositories: Repositories,
    pub event_bus: EventBus,
    pub ingress: Arc<EventIngress>,
    pub coordinator: Arc<WorkflowCoordinator>,
    pub pool: Arc<AgentPool>,
    pub gateway: Arc<ExecutionGateway>,
    sentinel: Option<Arc<SentinelMonitor>>,
    analyst: Option<Arc<AnalystScheduler>>,
}

impl Orchestrator {
    pub async fn from_config(spec: &OrchestratorConfigSpec) -> Result<Self> {
        let components = Components::from_config(spec).await?;
        Ok(Self::assemble(spec, components))
    }

    pub fn assemble(spec: &OrchestratorConfigSpec, components: Components) -> Self {
        let Components {
            repositories,
            telemetry,
            health_probe,
            executor,
            notifier,
            templates,
        } = components;
        let event_bus = EventBus::with_default_capacity();

        let gateway = Arc::new(ExecutionGateway::new(
            spec.gateway.policy.clone(),
            repositories.invocations.clone(),
            repositories.audit.clone(),
            executor,
            event_bus.clone(),
        ));

        let mut pool = AgentPool::new(repositories.invocations.clone(), event_bus.clone(), spec.agents.clone())
            .with_agent(Arc::new(Investigator::new(telemetry.clone())))
            .with_agent(Arc::new(Surgeon::new(gateway.clone(), health_probe.clone())))
            .with_agent(Arc::new(Clerk::new(repositories.knowledge.clone(), notifier, templates)));
        if spec.sentinel.enabled {
            pool.register(Arc::new(Sentinel::new(telemetry.clone(), spec.sentinel.rules.clone())));
        }
        if spec.analyst.enabled {
            pool.register(Arc::new(Analyst::new(
                telemetry,
                spec.analyst.series.clone(),
                spec.analyst.lookback,
                spec.analyst.horizon,
            )));
        }
        let pool = Arc::new(pool);

        let ingress = Arc::new(EventIngress::new(
            repositories.tasks.clone(),
            repositories.queue.clone(),
            event_bus.clone(),
            spec.ingress.alert_priority_threshold,
        ));

        let settings = CoordinatorSettings {
            workers: spec.coordinator.workers,
            lease_ttl: spec.coordinator.lease_ttl,
            poll_interval: spec.queue.poll_interval,
            max_deliveries: spec.queue.max_deliveries,
            sop_match_threshold: spec.coordinator.sop_match_threshold,
            knowledge_snapshot_limit: spec.coordinator.knowledge_snapshot_limit,
            verification: spec.verification.clone(),
        };
        let coordinator = Arc::new(WorkflowCoordinator::new(
            repositories.tasks.clone(),
            repositories.checkpoints.clone(),
            repositories.invocations.clone(),
            repositories.knowledge.clone(),
            repositories.leases.clone(),
            repositories.queue.clone(),
            pool.clone(),
            health_probe,
            event_bus.clone(),
            settings,
        ));

        let sentinel = spec
            .sentinel
            .enabled
            .then(|| Arc::new(SentinelMonitor::new(pool.clone(), ingress.clone(), spec.sentinel.interval)));
        let analyst = spec.analyst.enabled.then(|| {
            Arc::new(AnalystScheduler::new(
                pool.clone(),
                repositories.knowledge.clone(),
                spec.analyst.interval,
            ))
        });

        info!(
            roles = ?pool.roles(),
            workers = spec.coordinator.workers,
            "Orchestrator assembled"
        );

        Self {
            repositories,
            event_bus,
            ingress,
            coordinator,
            pool,
            gateway,
            sentinel,
            analyst,
        }
    }

    /// Start the coordinator workers and the periodic agents.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = self.coordinator.spawn_workers(shutdown.clone());
        if let Some(sentinel) = &self.sentinel {
            handles.push(sentinel.clone().spawn(shutdown.clone()));
        }
        if let Some(analyst) = &self.analyst {
            handles.push(analyst.clone().spawn(shutdown));
        }
        handles
    }
}
