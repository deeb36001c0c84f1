// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Prometheus Metrics
//!
//! Metric names and recording helpers. Recording goes through the `metrics`
//! facade, so nothing is collected until an exporter is installed with
//! [`install_prometheus_exporter`] (the daemon does this when
//! `spec.metrics.enabled` is set).

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

pub const TASKS_SUBMITTED: &str = "vigil_tasks_submitted_total";
pub const TRIGGERS_REJECTED: &str = "vigil_triggers_rejected_total";
pub const TASK_OUTCOMES: &str = "vigil_task_outcomes_total";
pub const TASK_TRANSITIONS: &str = "vigil_task_transitions_total";
pub const AGENT_INVOCATIONS: &str = "vigil_agent_invocations_total";
pub const AGENT_INVOCATION_DURATION: &str = "vigil_agent_invocation_duration_seconds";
pub const GATEWAY_DECISIONS: &str = "vigil_gateway_decisions_total";
pub const QUEUE_DEPTH: &str = "vigil_queue_depth";

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;
    describe_metrics();
    Ok(())
}

pub fn describe_metrics() {
    describe_counter!(TASKS_SUBMITTED, Unit::Count, "Tasks accepted by the event ingress");
    describe_counter!(TRIGGERS_REJECTED, Unit::Count, "Malformed triggers dropped by the ingress");
    describe_counter!(TASK_OUTCOMES, Unit::Count, "Tasks reaching a terminal state");
    describe_counter!(TASK_TRANSITIONS, Unit::Count, "Checkpointed workflow transitions");
    describe_counter!(AGENT_INVOCATIONS, Unit::Count, "Agent invocation attempts by role and outcome");
    describe_histogram!(AGENT_INVOCATION_DURATION, Unit::Seconds, "Agent invocation latency");
    describe_counter!(GATEWAY_DECISIONS, Unit::Count, "Execution gateway decisions");
    describe_gauge!(QUEUE_DEPTH, Unit::Count, "Unacknowledged queue messages");
}

pub fn record_task_submitted(trigger: &'static str, priority: &'static str) {
    counter!(TASKS_SUBMITTED, "trigger" => trigger, "priority" => priority).increment(1);
}

pub fn record_trigger_rejected() {
    counter!(TRIGGERS_REJECTED).increment(1);
}

pub fn record_transition(to: &'static str) {
    counter!(TASK_TRANSITIONS, "to" => to).increment(1);
}

/// `reason` is the escalation kind, or `"none"` for resolved tasks.
pub fn record_task_outcome(outcome: &'static str, reason: &'static str) {
    counter!(TASK_OUTCOMES, "outcome" => outcome, "reason" => reason).increment(1);
}

pub fn record_invocation(role: &'static str, outcome: &'static str, duration: Duration) {
    counter!(AGENT_INVOCATIONS, "role" => role, "outcome" => outcome).increment(1);
    histogram!(AGENT_INVOCATION_DURATION, "role" => role).record(duration.as_secs_f64());
}

pub fn record_gateway_decision(decision: &'static str) {
    counter!(GATEWAY_DECISIONS, "decision" => decision).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}
