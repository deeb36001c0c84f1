// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod executor;
pub mod metrics;
pub mod notifier;
pub mod queue;
pub mod repositories;
pub mod summary_template;
pub mod telemetry;

pub use event_bus::{DomainEvent, EventBus};
pub use executor::{DryRunExecutor, HttpActionExecutor};
pub use notifier::{LogNotifier, NotificationDispatcher, WebhookNotifier};
pub use queue::{InMemoryTaskQueue, PostgresTaskQueue};
pub use telemetry::{HttpHealthProbe, PrometheusTelemetrySource, StaticTelemetrySource, TelemetryHealthProbe};
