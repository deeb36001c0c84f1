// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Investigator: root-cause analysis over telemetry.
//!
//! Metrics, logs and traces for the task target are fetched concurrently and
//! joined. The hypothesis is rule-based:
//!
//! - the triggering metric above its threshold gives the signature
//!   `<metric>:<target>`, with confidence growing with the deviation and with
//!   corroborating logs and traces;
//! - without a breaching metric, error logs (`errors:<target>`) or failing
//!   spans (`traces:<target>`) carry the hypothesis at lower confidence;
//! - with no telemetry at all the task needs a human.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::agent::{
    Agent, AgentContext, AgentOutcome, Artifact, OutcomeReason, ReasonCode, RootCauseHypothesis,
};
use crate::domain::invocation::AgentRole;
use crate::domain::knowledge::{tokenize, KnowledgeCategory};
use crate::domain::task::Task;
use crate::domain::telemetry::{LogLine, MetricSample, TelemetrySource, TraceSpan};

const MAX_EVIDENCE_LINES: usize = 3;
const MAX_LOG_KEYWORDS: usize = 6;

pub struct Investigator {
    telemetry: Arc<dyn TelemetrySource>,
    log_limit: usize,
    trace_limit: usize,
}

impl Investigator {
    pub fn new(telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self {
            telemetry,
            log_limit: 50,
            trace_limit: 20,
        }
    }

    pub fn with_limits(mut self, log_limit: usize, trace_limit: usize) -> Self {
        self.log_limit = log_limit;
        self.trace_limit = trace_limit;
        self
    }

    async fn read_metric(&self, task: &Task) -> Option<MetricSample> {
        let signal = task.signal.as_ref()?;
        match self.telemetry.metric(&signal.metric, &task.target).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(task_id = %task.id, metric = %signal.metric, error = %e, "Metric query failed");
                None
            }
        }
    }

    async fn read_logs(&self, task: &Task) -> Vec<LogLine> {
        self.telemetry.logs(&task.target, self.log_limit).await.unwrap_or_else(|e| {
            warn!(task_id = %task.id, error = %e, "Log query failed");
            Vec::new()
        })
    }

    async fn read_traces(&self, task: &Task) -> Vec<TraceSpan> {
        self.telemetry.traces(&task.target, self.trace_limit).await.unwrap_or_else(|e| {
            warn!(task_id = %task.id, error = %e, "Trace query failed");
            Vec::new()
        })
    }
}

#[async_trait]
impl Agent for Investigator {
    fn role(&self) -> AgentRole {
        AgentRole::Investigator
    }

    async fn handle(&self, context: &AgentContext) -> AgentOutcome {
        let Some(task) = context.task.as_ref() else {
            return AgentOutcome::Failure(OutcomeReason::new(ReasonCode::MissingContext, "no task in context"));
        };

        let (sample, logs, traces) = tokio::join!(self.read_metric(task), self.read_logs(task), self.read_traces(task));
        debug!(
            task_id = %task.id,
            metric = sample.is_some(),
            logs = logs.len(),
            traces = traces.len(),
            "Telemetry collected"
        );

        if sample.is_none() && logs.is_empty() && traces.is_empty() {
            return AgentOutcome::NeedsEscalation(OutcomeReason::new(
                ReasonCode::NoTelemetry,
                format!("no metrics, logs or traces available for {}", task.target),
            ));
        }

        let mut hypothesis = hypothesize(task, sample.as_ref(), &logs, &traces);
        for case in context
            .knowledge
            .iter()
            .filter(|k| k.category == KnowledgeCategory::HistoricalCase)
            .filter(|k| k.applicability.signatures.contains(&hypothesis.signature))
            .take(MAX_EVIDENCE_LINES)
        {
            hypothesis.evidence.push(format!("similar past incident: {}", case.title));
        }
        AgentOutcome::Success(Artifact::RootCause(hypothesis))
    }
}

fn hypothesize(task: &Task, sample: Option<&MetricSample>, logs: &[LogLine], traces: &[TraceSpan]) -> RootCauseHypothesis {
    let mut keywords: BTreeSet<String> = task.keywords().iter().flat_map(|k| tokenize(k)).collect();
    let mut evidence = Vec::new();

    let failing_spans: Vec<&TraceSpan> = traces.iter().filter(|s| s.error).collect();
    let corroboration = 0.05 * (!logs.is_empty() as u8 + !failing_spans.is_empty() as u8) as f64;

    let breach = match (sample, task.signal.as_ref()) {
        (Some(sample), Some(signal)) => {
            evidence.push(format!(
                "{} on {} is {:.2} (threshold {:.2})",
                sample.metric, sample.target, sample.value, signal.threshold
            ));
            (sample.value > signal.threshold).then_some((sample, signal.threshold))
        }
        _ => None,
    };

    for line in logs.iter().take(MAX_EVIDENCE_LINES) {
        evidence.push(format!("{} log: {}", line.level, line.message));
    }
    for span in traces.iter().take(MAX_EVIDENCE_LINES) {
        evidence.push(format!(
            "span {} took {:.0} ms{}",
            span.operation,
            span.duration_ms,
            if span.error { " (error)" } else { "" }
        ));
    }

    let (summary, signature, confidence) = if let Some((sample, threshold)) = breach {
        let deviation = if threshold.abs() > f64::EPSILON {
            (sample.value - threshold) / threshold.abs()
        } else {
            1.0
        };
        (
            format!(
                "{} on {} at {:.2} exceeds baseline {:.2}",
                sample.metric, task.target, sample.value, threshold
            ),
            format!("{}:{}", sample.metric, task.target),
            (0.6 + deviation.min(1.0) * 0.25 + corroboration).min(0.95),
        )
    } else if !logs.is_empty() {
        let mut log_words = BTreeSet::new();
        for line in logs {
            log_words.extend(tokenize(&line.message).into_iter().filter(|w| w.len() > 3 && !is_number(w)));
        }
        keywords.extend(log_words.into_iter().take(MAX_LOG_KEYWORDS));
        keywords.insert("errors".to_string());
        (
            format!("{} error log line(s) on {}: {}", logs.len(), task.target, logs[0].message),
            format!("errors:{}", task.target),
            (0.4 + corroboration).min(0.95),
        )
    } else if !traces.is_empty() {
        keywords.insert("latency".to_string());
        let slowest = traces
            .iter()
            .max_by(|a, b| a.duration_ms.partial_cmp(&b.duration_ms).unwrap_or(std::cmp::Ordering::Equal));
        let operation = slowest.map(|s| s.operation.as_str()).unwrap_or("unknown");
        (
            format!("{} slow or failing span(s) on {}, slowest {}", traces.len(), task.target, operation),
            format!("traces:{}", task.target),
            0.35 + corroboration,
        )
    } else {
        // Only a metric within its threshold: the condition cleared on its own
        keywords.insert("transient".to_string());
        (
            format!("signal on {} is back within baseline", task.target),
            format!("recovered:{}", task.target),
            0.3,
        )
    };

    RootCauseHypothesis {
        summary,
        signature,
        keywords: keywords.into_iter().collect(),
        confidence,
        affected_scope: vec![task.target.clone()],
        evidence,
    }
}

fn is_number(word: &str) -> bool {
    word.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invocation::InvocationKey;
    use crate::domain::knowledge::{Applicability, KnowledgeEntry};
    use crate::domain::task::{Priority, Severity, Signal, TriggerSource};
    use crate::infrastructure::telemetry::StaticTelemetrySource;

    fn cpu_task() -> Task {
        Task::new(
            TriggerSource::Alert {
                source: "alertmanager".into(),
                alert_name: "HighCpu".into(),
                severity: Severity::Critical,
            },
            "checkout",
            Some(Signal { metric: "cpu_usage".into(), threshold: 80.0, observed: Some(97.0) }),
            serde_json::Value::Null,
            Priority::Urgent,
        )
    }

    fn context(task: Task) -> AgentContext {
        AgentContext::for_task(InvocationKey::for_step(task.id, "investigate"), task)
    }

    fn root_cause(outcome: AgentOutcome) -> RootCauseHypothesis {
        match outcome {
            AgentOutcome::Success(Artifact::RootCause(rc)) => rc,
            other => panic!("expected a root cause, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn breaching_metric_yields_signature() {
        let telemetry = StaticTelemetrySource::new()
            .with_metric("cpu_usage", "checkout", vec![97.0])
            .with_log("checkout", "worker pool exhausted");
        let investigator = Investigator::new(Arc::new(telemetry));

        let rc = root_cause(investigator.handle(&context(cpu_task())).await);
        assert_eq!(rc.signature, "cpu_usage:checkout");
        assert!(rc.summary.contains("97.00"));
        assert!(rc.confidence > 0.6 && rc.confidence <= 0.95);
        assert!(rc.keywords.contains(&"cpu".to_string()));
        assert_eq!(rc.affected_scope, vec!["checkout".to_string()]);
        assert!(rc.evidence.iter().any(|e| e.contains("worker pool exhausted")));
    }

    #[tokio::test]
    async fn logs_alone_give_error_hypothesis() {
        let telemetry = StaticTelemetrySource::new().with_log("checkout", "connection refused by payments-db");
        let investigator = Investigator::new(Arc::new(telemetry));
        let mut task = cpu_task();
        task.signal = None;

        let rc = root_cause(investigator.handle(&context(task)).await);
        assert_eq!(rc.signature, "errors:checkout");
        assert!(rc.keywords.contains(&"refused".to_string()));
        assert!(rc.confidence < 0.6);
    }

    #[tokio::test]
    async fn past_incidents_are_cited() {
        let telemetry = StaticTelemetrySource::new().with_metric("cpu_usage", "checkout", vec![97.0]);
        let investigator = Investigator::new(Arc::new(telemetry));
        let past = KnowledgeEntry::new(KnowledgeCategory::HistoricalCase, "checkout cpu spike in March", "...")
            .with_applicability(Applicability {
                signatures: vec!["cpu_usage:checkout".into()],
                ..Applicability::default()
            });

        let rc = root_cause(investigator.handle(&context(cpu_task()).with_knowledge(vec![past])).await);
        assert!(rc.evidence.iter().any(|e| e.contains("checkout cpu spike in March")));
    }

    #[tokio::test]
    async fn no_telemetry_needs_escalation() {
        let investigator = Investigator::new(Arc::new(StaticTelemetrySource::new()));
        let outcome = investigator.handle(&context(cpu_task())).await;
        assert!(matches!(
            outcome,
            AgentOutcome::NeedsEscalation(OutcomeReason { code: ReasonCode::NoTelemetry, .. })
        ));
    }
}
