// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Telemetry Adapters
//
// Anti-Corruption Layer between the agents and the observability stack:
// - PrometheusTelemetrySource: Prometheus HTTP API for metrics, optional
//   Loki for logs and Tempo for traces
// - StaticTelemetrySource: canned values from configuration (development,
//   demos and tests)
// - TelemetryHealthProbe / HttpHealthProbe: post-remediation health checks

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::config::{HealthProbeConfig, StaticLog, StaticMetric, TelemetryConfig};
use crate::domain::telemetry::{
    HealthProbe, HealthReport, LogLine, MetricSample, SeriesPoint, TelemetryError, TelemetrySource, TraceSpan,
};

pub fn build_telemetry_source(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySource>, TelemetryError> {
    match config {
        TelemetryConfig::Prometheus {
            endpoint,
            loki_endpoint,
            tempo_endpoint,
            target_label,
            timeout,
        } => Ok(Arc::new(PrometheusTelemetrySource::new(
            endpoint.clone(),
            loki_endpoint.clone(),
            tempo_endpoint.clone(),
            target_label.clone(),
            *timeout,
        )?)),
        TelemetryConfig::Static { metrics, logs } => Ok(Arc::new(StaticTelemetrySource::from_config(metrics, logs))),
    }
}

pub fn build_health_probe(
    config: &HealthProbeConfig,
    telemetry: Arc<dyn TelemetrySource>,
) -> Result<Arc<dyn HealthProbe>, TelemetryError> {
    match config {
        HealthProbeConfig::Telemetry { default_metric } => {
            Ok(Arc::new(TelemetryHealthProbe::new(telemetry, default_metric.clone())))
        }
        HealthProbeConfig::Http { url_template, timeout } => {
            Ok(Arc::new(HttpHealthProbe::new(url_template.clone(), *timeout)?))
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, TelemetryError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TelemetryError::Unavailable(format!("failed to build HTTP client: {}", e)))
}

fn epoch_to_utc(seconds: f64) -> DateTime<Utc> {
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds.fract()) * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
}

// ============================================================================
// Prometheus / Loki / Tempo
// ============================================================================

#[derive(Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromResult>,
}

#[derive(Deserialize)]
struct PromResult {
    /// Instant vectors
    #[serde(default)]
    value: Option<(f64, String)>,
    /// Range vectors
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

#[derive(Deserialize)]
struct LokiResponse {
    data: LokiData,
}

#[derive(Deserialize)]
struct LokiData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

#[derive(Deserialize)]
struct LokiStream {
    #[serde(default)]
    stream: HashMap<String, String>,
    /// `[nanosecond timestamp, line]`
    #[serde(default)]
    values: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct TempoSearchResponse {
    #[serde(default)]
    traces: Vec<TempoTrace>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TempoTrace {
    #[serde(default)]
    root_trace_name: Option<String>,
    #[serde(default)]
    duration_ms: Option<f64>,
}

pub struct PrometheusTelemetrySource {
    client: reqwest::Client,
    endpoint: String,
    loki_endpoint: Option<String>,
    tempo_endpoint: Option<String>,
    target_label: String,
}

impl PrometheusTelemetrySource {
    pub fn new(
        endpoint: String,
        loki_endpoint: Option<String>,
        tempo_endpoint: Option<String>,
        target_label: String,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            loki_endpoint: loki_endpoint.map(|e| e.trim_end_matches('/').to_string()),
            tempo_endpoint: tempo_endpoint.map(|e| e.trim_end_matches('/').to_string()),
            target_label,
        })
    }

    fn selector(&self, metric: &str, target: &str) -> String {
        format!("{}{{{}=\"{}\"}}", metric, self.target_label, target.replace('"', "\\\""))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        base: &str,
        params: &[(&str, String)],
    ) -> Result<T, TelemetryError> {
        let url = reqwest::Url::parse_with_params(base, params)
            .map_err(|e| TelemetryError::InvalidResponse(format!("invalid URL {}: {}", base, e)))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TelemetryError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Unavailable(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| TelemetryError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    fn prom_data(response: PromResponse) -> Result<PromData, TelemetryError> {
        if response.status != "success" {
            return Err(TelemetryError::InvalidResponse(
                response.error.unwrap_or_else(|| format!("status {}", response.status)),
            ));
        }
        response
            .data
            .ok_or_else(|| TelemetryError::InvalidResponse("missing data".to_string()))
    }
}

fn parse_value(raw: &str) -> Result<f64, TelemetryError> {
    raw.parse::<f64>()
        .map_err(|_| TelemetryError::InvalidResponse(format!("non-numeric sample '{}'", raw)))
}

#[async_trait]
impl TelemetrySource for PrometheusTelemetrySource {
    async fn metric(&self, metric: &str, target: &str) -> Result<Option<MetricSample>, TelemetryError> {
        let url = format!("{}/api/v1/query", self.endpoint);
        let response: PromResponse = self.get_json(&url, &[("query", self.selector(metric, target))]).await?;
        let data = Self::prom_data(response)?;

        let Some((at, raw)) = data.result.into_iter().find_map(|r| r.value) else {
            return Ok(None);
        };
        Ok(Some(MetricSample {
            metric: metric.to_string(),
            target: target.to_string(),
            value: parse_value(&raw)?,
            sampled_at: epoch_to_utc(at),
        }))
    }

    async fn logs(&self, target: &str, limit: usize) -> Result<Vec<LogLine>, TelemetryError> {
        let Some(loki) = &self.loki_endpoint else {
            return Ok(Vec::new());
        };
        let url = format!("{}/loki/api/v1/query_range", loki);
        let query = format!(
            "{{{}=\"{}\"}} |~ \"(?i)(error|fatal|panic)\"",
            self.target_label, target
        );
        let response: LokiResponse = self
            .get_json(&url, &[("query", query), ("limit", limit.to_string()), ("direction", "backward".into())])
            .await?;

        let mut lines = Vec::new();
        for stream in response.data.result {
            let level = stream.stream.get("level").cloned().unwrap_or_else(|| "error".to_string());
            for (ts, line) in stream.values {
                let nanos: i64 = ts.parse().unwrap_or(0);
                lines.push(LogLine {
                    target: target.to_string(),
                    level: level.clone(),
                    message: line,
                    logged_at: Utc.timestamp_nanos(nanos),
                });
            }
        }
        lines.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));
        lines.truncate(limit);
        Ok(lines)
    }

    async fn traces(&self, target: &str, limit: usize) -> Result<Vec<TraceSpan>, TelemetryError> {
        let Some(tempo) = &self.tempo_endpoint else {
            return Ok(Vec::new());
        };
        let url = format!("{}/api/search", tempo);
        let response: TempoSearchResponse = self
            .get_json(
                &url,
                &[("tags", format!("service.name={} status=error", target)), ("limit", limit.to_string())],
            )
            .await?;

        Ok(response
            .traces
            .into_iter()
            .take(limit)
            .map(|t| TraceSpan {
                target: target.to_string(),
                operation: t.root_trace_name.unwrap_or_else(|| "unknown".to_string()),
                duration_ms: t.duration_ms.unwrap_or(0.0),
                error: true,
            })
            .collect())
    }

    async fn series(&self, metric: &str, target: &str, lookback: Duration) -> Result<Vec<SeriesPoint>, TelemetryError> {
        let end = Utc::now();
        let start = end - ChronoDuration::from_std(lookback).unwrap_or_else(|_| ChronoDuration::days(7));
        // ~250 points regardless of the window
        let step = (lookback.as_secs() / 250).max(60);

        let url = format!("{}/api/v1/query_range", self.endpoint);
        let response: PromResponse = self
            .get_json(
                &url,
                &[
                    ("query", self.selector(metric, target)),
                    ("start", start.timestamp().to_string()),
                    ("end", end.timestamp().to_string()),
                    ("step", step.to_string()),
                ],
            )
            .await?;
        let data = Self::prom_data(response)?;

        let mut points = Vec::new();
        for (at, raw) in data.result.into_iter().filter_map(|r| r.values).flatten() {
            points.push(SeriesPoint { at: epoch_to_utc(at), value: parse_value(&raw)? });
        }
        points.sort_by(|a, b| a.at.cmp(&b.at));
        Ok(points)
    }
}

// ============================================================================
// Static source
// ============================================================================

#[derive(Debug, Clone)]
struct StaticSeries {
    values: Vec<f64>,
    cursor: usize,
}

/// Serves configured values. Each `metric()` read returns the next value of
/// the list; the last one repeats.
#[derive(Default)]
pub struct StaticTelemetrySource {
    metrics: Mutex<HashMap<(String, String), StaticSeries>>,
    logs: Vec<StaticLog>,
}

impl StaticTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(metrics: &[StaticMetric], logs: &[StaticLog]) -> Self {
        let source = Self { metrics: Mutex::new(HashMap::new()), logs: logs.to_vec() };
        for m in metrics {
            source.set_metric(&m.metric, &m.target, m.values.clone());
        }
        source
    }

    pub fn with_metric(self, metric: &str, target: &str, values: Vec<f64>) -> Self {
        self.set_metric(metric, target, values);
        self
    }

    pub fn with_log(mut self, target: &str, message: &str) -> Self {
        self.logs.push(StaticLog {
            target: target.to_string(),
            level: "error".to_string(),
            message: message.to_string(),
        });
        self
    }

    /// Replace the values served for `metric` on `target`.
    pub fn set_metric(&self, metric: &str, target: &str, values: Vec<f64>) {
        self.metrics
            .lock()
            .insert((metric.to_string(), target.to_string()), StaticSeries { values, cursor: 0 });
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetrySource {
    async fn metric(&self, metric: &str, target: &str) -> Result<Option<MetricSample>, TelemetryError> {
        let mut metrics = self.metrics.lock();
        let Some(series) = metrics.get_mut(&(metric.to_string(), target.to_string())) else {
            return Ok(None);
        };
        let Some(last) = series.values.len().checked_sub(1) else {
            return Ok(None);
        };
        let value = series.values[series.cursor.min(last)];
        series.cursor = (series.cursor + 1).min(last);
        Ok(Some(MetricSample {
            metric: metric.to_string(),
            target: target.to_string(),
            value,
            sampled_at: Utc::now(),
        }))
    }

    async fn logs(&self, target: &str, limit: usize) -> Result<Vec<LogLine>, TelemetryError> {
        Ok(self
            .logs
            .iter()
            .filter(|l| l.target == target)
            .take(limit)
            .map(|l| LogLine {
                target: l.target.clone(),
                level: l.level.clone(),
                message: l.message.clone(),
                logged_at: Utc::now(),
            })
            .collect())
    }

    async fn traces(&self, _target: &str, _limit: usize) -> Result<Vec<TraceSpan>, TelemetryError> {
        Ok(Vec::new())
    }

    /// The configured values spread evenly over the lookback window.
    async fn series(&self, metric: &str, target: &str, lookback: Duration) -> Result<Vec<SeriesPoint>, TelemetryError> {
        let metrics = self.metrics.lock();
        let Some(series) = metrics.get(&(metric.to_string(), target.to_string())) else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        let count = series.values.len();
        let window = ChronoDuration::from_std(lookback).unwrap_or_else(|_| ChronoDuration::days(7));
        let step = if count > 1 { window / (count as i32 - 1) } else { ChronoDuration::zero() };
        Ok(series
            .values
            .iter()
            .enumerate()
            .map(|(i, value)| SeriesPoint {
                at: now - window + step * i as i32,
                value: *value,
            })
            .collect())
    }
}

// ============================================================================
// Health probes
// ============================================================================

/// Re-reads the triggering metric and compares it with the threshold.
pub struct TelemetryHealthProbe {
    source: Arc<dyn TelemetrySource>,
    default_metric: Option<String>,
}

impl TelemetryHealthProbe {
    pub fn new(source: Arc<dyn TelemetrySource>, default_metric: Option<String>) -> Self {
        Self { source, default_metric }
    }
}

#[async_trait]
impl HealthProbe for TelemetryHealthProbe {
    async fn check(
        &self,
        target: &str,
        metric: Option<&str>,
        threshold: Option<f64>,
    ) -> Result<HealthReport, TelemetryError> {
        let Some(metric) = metric.or(self.default_metric.as_deref()) else {
            return Ok(HealthReport::healthy(format!("no signal to verify for {}", target)));
        };
        let Some(sample) = self.source.metric(metric, target).await? else {
            return Ok(HealthReport::unhealthy(format!("no {} sample for {}", metric, target)));
        };

        let report = match threshold {
            Some(limit) if sample.value > limit => HealthReport::unhealthy(format!(
                "{} on {} is {:.2}, above threshold {:.2}",
                metric, target, sample.value, limit
            )),
            Some(limit) => HealthReport::healthy(format!(
                "{} on {} is {:.2}, within threshold {:.2}",
                metric, target, sample.value, limit
            )),
            None => HealthReport::healthy(format!("{} on {} reports {:.2}", metric, target, sample.value)),
        };
        Ok(report.with_observed(sample.value))
    }
}

/// GETs a health endpoint; any 2xx answer counts as healthy.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url_template: String,
}

impl HttpHealthProbe {
    pub fn new(url_template: String, timeout: Duration) -> Result<Self, TelemetryError> {
        Ok(Self { client: build_client(timeout)?, url_template })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(
        &self,
        target: &str,
        _metric: Option<&str>,
        _threshold: Option<f64>,
    ) -> Result<HealthReport, TelemetryError> {
        let url = self.url_template.replace("{target}", target);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TelemetryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(HealthReport::healthy(format!("{} answered {}", url, status)))
        } else {
            Ok(HealthReport::unhealthy(format!("{} answered {}", url, status)))
        }
    }
}
