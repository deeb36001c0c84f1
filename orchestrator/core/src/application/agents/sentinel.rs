// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sentinel: watches metrics against threshold rules and emits alert
//! triggers for breaches. It never creates tasks itself; the emitted raw
//! triggers go through the event ingress like any other alert.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::agent::{Agent, AgentContext, AgentOutcome, Artifact, OutcomeReason, ReasonCode};
use crate::domain::config::SentinelRule;
use crate::domain::invocation::AgentRole;
use crate::domain::telemetry::TelemetrySource;

pub struct Sentinel {
    telemetry: Arc<dyn TelemetrySource>,
    rules: Vec<SentinelRule>,
}

impl Sentinel {
    pub fn new(telemetry: Arc<dyn TelemetrySource>, rules: Vec<SentinelRule>) -> Self {
        Self { telemetry, rules }
    }
}

/// Raw alert trigger for a breached rule, in the ingress alert shape.
pub fn breach_trigger(rule: &SentinelRule, observed: f64) -> serde_json::Value {
    json!({
        "type": "alert",
        "source": "sentinel",
        "alert_name": rule.alert_name,
        "target": rule.target,
        "severity": rule.severity,
        "metric": rule.metric,
        "value": observed,
        "threshold": rule.threshold,
    })
}

#[async_trait]
impl Agent for Sentinel {
    fn role(&self) -> AgentRole {
        AgentRole::Sentinel
    }

    async fn handle(&self, _context: &AgentContext) -> AgentOutcome {
        let mut triggers = Vec::new();
        let mut unreadable = 0;

        for rule in &self.rules {
            match self.telemetry.metric(&rule.metric, &rule.target).await {
                Ok(Some(sample)) if sample.value > rule.threshold => {
                    debug!(
                        alert = %rule.alert_name,
                        target = %rule.target,
                        value = sample.value,
                        threshold = rule.threshold,
                        "Threshold breached"
                    );
                    triggers.push(breach_trigger(rule, sample.value));
                }
                Ok(Some(_)) => {}
                Ok(None) => unreadable += 1,
                Err(e) => {
                    warn!(metric = %rule.metric, target = %rule.target, error = %e, "Sentinel could not read metric");
                    unreadable += 1;
                }
            }
        }

        if !self.rules.is_empty() && unreadable == self.rules.len() {
            return AgentOutcome::Failure(OutcomeReason::new(
                ReasonCode::NoTelemetry,
                "no sentinel rule could be evaluated",
            ));
        }
        AgentOutcome::Success(Artifact::Triggers(triggers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Severity;
    use crate::infrastructure::telemetry::StaticTelemetrySource;

    fn rule(metric: &str, threshold: f64) -> SentinelRule {
        SentinelRule {
            alert_name: format!("High{}", metric),
            metric: metric.into(),
            target: "checkout".into(),
            threshold,
            severity: Severity::Critical,
        }
    }

    #[tokio::test]
    async fn emits_triggers_only_for_breaches() {
        let telemetry = Arc::new(
            StaticTelemetrySource::new()
                .with_metric("cpu_usage", "checkout", vec![97.0])
                .with_metric("memory_usage", "checkout", vec![40.0]),
        );
        let sentinel = Sentinel::new(telemetry, vec![rule("cpu_usage", 80.0), rule("memory_usage", 90.0)]);

        let outcome = sentinel.handle(&AgentContext::scheduled()).await;
        let AgentOutcome::Success(Artifact::Triggers(triggers)) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0]["alert_name"], "Highcpu_usage");
        assert_eq!(triggers[0]["severity"], "critical");
        assert_eq!(triggers[0]["value"], 97.0);
    }

    #[tokio::test]
    async fn fails_when_no_rule_can_be_read() {
        let sentinel = Sentinel::new(Arc::new(StaticTelemetrySource::new()), vec![rule("cpu_usage", 80.0)]);
        let outcome = sentinel.handle(&AgentContext::scheduled()).await;
        assert_eq!(outcome.reason().map(|r| r.code), Some(ReasonCode::NoTelemetry));
    }
}
