// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Telemetry Ports
//!
//! Read-only access to the observability backends the agents investigate
//! with ([`TelemetrySource`]) and the post-remediation health check
//! ([`HealthProbe`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub target: String,
    pub value: f64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub target: String,
    pub level: String,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub target: String,
    pub operation: String,
    pub duration_ms: f64,
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelemetryError {
    #[error("Telemetry backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected telemetry response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Latest value of `metric` for `target`, if any.
    async fn metric(&self, metric: &str, target: &str) -> Result<Option<MetricSample>, TelemetryError>;

    /// Recent error-level log lines for `target`.
    async fn logs(&self, target: &str, limit: usize) -> Result<Vec<LogLine>, TelemetryError>;

    /// Recent slow or failing spans for `target`.
    async fn traces(&self, target: &str, limit: usize) -> Result<Vec<TraceSpan>, TelemetryError>;

    /// Historical series for trend analysis, oldest first.
    async fn series(
        &self,
        metric: &str,
        target: &str,
        lookback: std::time::Duration,
    ) -> Result<Vec<SeriesPoint>, TelemetryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
    pub detail: String,
}

impl HealthReport {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self { healthy: true, observed: None, detail: detail.into() }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self { healthy: false, observed: None, detail: detail.into() }
    }

    pub fn with_observed(mut self, observed: f64) -> Self {
        self.observed = Some(observed);
        self
    }
}

/// Checks whether a target is back to its baseline.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `metric`/`threshold` come from the task signal when there is one.
    async fn check(
        &self,
        target: &str,
        metric: Option<&str>,
        threshold: Option<f64>,
    ) -> Result<HealthReport, TelemetryError>;
}
