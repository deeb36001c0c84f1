// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Analyst: capacity trends.
//!
//! Fits a least-squares line to each configured series over the lookback
//! window and projects when the series reaches its capacity. A projection
//! inside the horizon yields a `CapacityFinding`; a series already at or
//! above 90% of capacity yields a `RiskFinding`. Findings expire after the
//! horizon and carry a `series:<metric>:<target>` tag so the scheduler can
//! replace the previous finding for the same series.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::agent::{Agent, AgentContext, AgentOutcome, Artifact, OutcomeReason, ReasonCode};
use crate::domain::config::CapacitySeries;
use crate::domain::invocation::AgentRole;
use crate::domain::knowledge::{Applicability, Importance, KnowledgeCategory, KnowledgeEntry};
use crate::domain::telemetry::{SeriesPoint, TelemetrySource};

const RISK_RATIO: f64 = 0.9;

pub struct Analyst {
    telemetry: Arc<dyn TelemetrySource>,
    series: Vec<CapacitySeries>,
    lookback: Duration,
    horizon: Duration,
}

impl Analyst {
    pub fn new(telemetry: Arc<dyn TelemetrySource>, series: Vec<CapacitySeries>, lookback: Duration, horizon: Duration) -> Self {
        Self {
            telemetry,
            series,
            lookback,
            horizon,
        }
    }
}

/// Tag identifying the series a finding was computed from.
pub fn series_tag(metric: &str, target: &str) -> String {
    format!("series:{}:{}", metric, target)
}

/// Least-squares slope (value per second) and the last observed value.
pub fn linear_trend(points: &[SeriesPoint]) -> Option<(f64, f64)> {
    let (first, last) = (points.first()?, points.last()?);
    if points.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.at - first.at).num_milliseconds() as f64 / 1000.0)
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.value).sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, p) in xs.iter().zip(points) {
        covariance += (x - mean_x) * (p.value - mean_y);
        variance += (x - mean_x).powi(2);
    }
    if variance <= f64::EPSILON {
        return None;
    }
    Some((covariance / variance, last.value))
}

impl Analyst {
    fn assess(&self, series: &CapacitySeries, points: &[SeriesPoint]) -> Option<KnowledgeEntry> {
        let (slope, current) = linear_trend(points)?;
        let horizon_secs = self.horizon.as_secs_f64();
        let utilisation = if series.capacity > 0.0 { current / series.capacity } else { 1.0 };

        let (category, importance, title, detail) = if utilisation >= RISK_RATIO {
            (
                KnowledgeCategory::RiskFinding,
                if current >= series.capacity { Importance::Critical } else { Importance::High },
                format!("{} on {} at {:.0}% of capacity", series.metric, series.target, utilisation * 100.0),
                format!(
                    "{} on {} is {:.2} against a capacity of {:.2}.",
                    series.metric, series.target, current, series.capacity
                ),
            )
        } else if slope > 0.0 {
            let seconds_left = (series.capacity - current) / slope;
            if seconds_left > horizon_secs {
                return None;
            }
            let days = seconds_left / 86_400.0;
            (
                KnowledgeCategory::CapacityFinding,
                if seconds_left < horizon_secs / 4.0 { Importance::High } else { Importance::Medium },
                format!("{} on {} projected to reach capacity in {:.1} days", series.metric, series.target, days),
                format!(
                    "{} on {} is {:.2} and growing {:.4} per hour; capacity {:.2} is reached in about {:.1} days.",
                    series.metric,
                    series.target,
                    current,
                    slope * 3600.0,
                    series.capacity,
                    days
                ),
            )
        } else {
            return None;
        };

        let expires_at = Utc::now() + ChronoDuration::from_std(self.horizon).unwrap_or_else(|_| ChronoDuration::days(7));
        Some(
            KnowledgeEntry::new(category, title, detail)
                .with_applicability(Applicability {
                    signatures: vec![format!("{}:{}", series.metric, series.target)],
                    keywords: vec![series.metric.clone(), "capacity".to_string()],
                    services: vec![series.target.clone()],
                })
                .with_tags(["capacity".to_string(), series_tag(&series.metric, &series.target)])
                .with_importance(importance)
                .authored_by(AgentRole::Analyst.as_str())
                .expiring_at(expires_at),
        )
    }
}

#[async_trait]
impl Agent for Analyst {
    fn role(&self) -> AgentRole {
        AgentRole::Analyst
    }

    async fn handle(&self, _context: &AgentContext) -> AgentOutcome {
        let mut findings = Vec::new();
        let mut unreadable = 0;
        for series in &self.series {
            match self.telemetry.series(&series.metric, &series.target, self.lookback).await {
                Ok(points) => {
                    debug!(metric = %series.metric, target = %series.target, points = points.len(), "Series loaded");
                    findings.extend(self.assess(series, &points));
                }
                Err(e) => {
                    warn!(metric = %series.metric, target = %series.target, error = %e, "Series query failed");
                    unreadable += 1;
                }
            }
        }
        if !self.series.is_empty() && unreadable == self.series.len() {
            return AgentOutcome::Failure(OutcomeReason::new(ReasonCode::NoTelemetry, "no series could be loaded"));
        }
        AgentOutcome::Success(Artifact::Findings(findings))
    }
}
