// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration Types
//
// Defines the configuration schema of a VIGIL daemon:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Storage backend and queue timing
// - Coordinator, agent and verification tuning
// - Execution gateway policy and executor
// - Telemetry, notification and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::policy::ExecutionPolicy;
use crate::domain::repository::{PostgresConfig, StorageBackend};
use crate::domain::task::Severity;

pub const API_VERSION: &str = "vigil.dev/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level Kubernetes-style orchestrator configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "vigil.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub health_probe: HealthProbeConfig,
    #[serde(default)]
    pub sentinel: SentinelConfig,
    #[serde(default)]
    pub analyst: AnalystConfig,
    #[serde(default)]
    pub clerk: ClerkConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    /// Required for the postgres backend. Supports "env:VAR_NAME".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::InMemory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl StorageConfig {
    pub fn to_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageKind::InMemory => Ok(StorageBackend::InMemory),
            StorageKind::Postgres => {
                let url = self
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("spec.storage.database_url is required for the postgres backend"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string: resolve_env_reference(url)?,
                    max_connections: self.max_connections,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a delivered message stays invisible before redelivery.
    #[serde(default = "default_visibility_timeout", with = "humantime_serde")]
    pub visibility_timeout: Duration,

    /// Longest a worker blocks in one dequeue call.
    #[serde(default = "default_queue_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Deliveries after which a task that keeps failing is escalated
    /// instead of being redelivered again.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: default_visibility_timeout(),
            poll_interval: default_queue_poll_interval(),
            max_deliveries: default_max_deliveries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Alerts at or above this severity are queued as urgent.
    #[serde(default = "default_alert_priority_threshold")]
    pub alert_priority_threshold: Severity,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            alert_priority_threshold: default_alert_priority_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_lease_ttl", with = "humantime_serde")]
    pub lease_ttl: Duration,

    /// Minimum SOP score for "known remediation available".
    #[serde(default = "default_sop_match_threshold")]
    pub sop_match_threshold: f64,

    /// Knowledge entries handed to the Investigator per category.
    #[serde(default = "default_knowledge_snapshot_limit")]
    pub knowledge_snapshot_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            lease_ttl: default_lease_ttl(),
            sop_match_threshold: default_sop_match_threshold(),
            knowledge_snapshot_limit: default_knowledge_snapshot_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Deadline of one agent invocation attempt.
    #[serde(default = "default_invocation_timeout", with = "humantime_serde")]
    pub invocation_timeout: Duration,

    /// Retries after a timed-out attempt before the step escalates.
    #[serde(default = "default_max_timeout_retries")]
    pub max_timeout_retries: u32,

    /// Per-role overrides of `invocation_timeout`, keyed by role name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub timeouts: HashMap<String, humantime_serde::Serde<Duration>>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: default_invocation_timeout(),
            max_timeout_retries: default_max_timeout_retries(),
            timeouts: HashMap::new(),
        }
    }
}

impl AgentsConfig {
    pub fn timeout_for(&self, role: &str) -> Duration {
        self.timeouts
            .get(role)
            .map(|d| **d)
            .unwrap_or(self.invocation_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_verification_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_verification_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on the whole verification step.
    #[serde(default = "default_verification_wait_window", with = "humantime_serde")]
    pub wait_window: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_verification_attempts(),
            poll_interval: default_verification_poll_interval(),
            wait_window: default_verification_wait_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Log authorized actions without touching anything.
    DryRun,
    /// POST authorized actions to an automation endpoint.
    Http {
        endpoint: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default = "default_request_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::DryRun
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Rules are default-deny: an empty policy authorizes nothing.
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticMetric {
    pub metric: String,
    pub target: String,
    /// Returned one after another; the last value repeats.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticLog {
    pub target: String,
    #[serde(default = "default_static_log_level")]
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryConfig {
    Prometheus {
        endpoint: String,
        /// Loki base URL for log queries.
        #[serde(skip_serializing_if = "Option::is_none")]
        loki_endpoint: Option<String>,
        /// Tempo base URL for trace search.
        #[serde(skip_serializing_if = "Option::is_none")]
        tempo_endpoint: Option<String>,
        /// Label carrying the target name in PromQL selectors.
        #[serde(default = "default_target_label")]
        target_label: String,
        #[serde(default = "default_request_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
    Static {
        #[serde(default)]
        metrics: Vec<StaticMetric>,
        #[serde(default)]
        logs: Vec<StaticLog>,
    },
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig::Static { metrics: Vec::new(), logs: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthProbeConfig {
    /// Re-read the task signal from the telemetry source.
    Telemetry {
        /// Used when a task carries no signal of its own.
        #[serde(skip_serializing_if = "Option::is_none")]
        default_metric: Option<String>,
    },
    /// GET a health endpoint; `{target}` in the template is substituted.
    Http {
        url_template: String,
        #[serde(default = "default_request_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        HealthProbeConfig::Telemetry { default_metric: None }
    }
}

/// One threshold watched by the Sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelRule {
    pub alert_name: String,
    pub metric: String,
    pub target: String,
    pub threshold: f64,
    #[serde(default = "default_rule_severity")]
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_sentinel_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default)]
    pub rules: Vec<SentinelRule>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_sentinel_interval(),
            rules: Vec::new(),
        }
    }
}

/// A resource series the Analyst projects forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySeries {
    pub metric: String,
    pub target: String,
    /// Value at which the resource is exhausted.
    pub capacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_analyst_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_analyst_lookback", with = "humantime_serde")]
    pub lookback: Duration,

    /// Exhaustion projected within this horizon produces a finding.
    #[serde(default = "default_analyst_horizon", with = "humantime_serde")]
    pub horizon: Duration,

    #[serde(default)]
    pub series: Vec<CapacitySeries>,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_analyst_interval(),
            lookback: default_analyst_lookback(),
            horizon: default_analyst_horizon(),
            series: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClerkConfig {
    /// Handlebars template replacing the built-in incident summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    Log,
    Webhook {
        url: String,
        #[serde(default = "default_request_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_channels")]
    pub channels: Vec<NotificationChannel>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { channels: default_channels() }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8400
}

fn default_metrics_port() -> u16 {
    9400
}

fn default_max_connections() -> u32 {
    10
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_queue_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_alert_priority_threshold() -> Severity {
    Severity::Critical
}

fn default_workers() -> usize {
    4
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(120)
}

fn default_sop_match_threshold() -> f64 {
    0.6
}

fn default_knowledge_snapshot_limit() -> usize {
    10
}

fn default_invocation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_timeout_retries() -> u32 {
    2
}

fn default_verification_attempts() -> u32 {
    3
}

fn default_verification_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_verification_wait_window() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_target_label() -> String {
    "service".to_string()
}

fn default_static_log_level() -> String {
    "error".to_string()
}

fn default_rule_severity() -> Severity {
    Severity::Warning
}

fn default_sentinel_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_analyst_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_analyst_lookback() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_analyst_horizon() -> Duration {
    Duration::from_secs(14 * 24 * 3600)
}

fn default_channels() -> Vec<NotificationChannel> {
    vec![NotificationChannel {
        name: "log".to_string(),
        kind: ChannelKind::Log,
    }]
}

/// Resolve `env:VAR_NAME` references, returning other values unchanged.
pub fn resolve_env_reference(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).map_err(|_| anyhow::anyhow!("Environment variable '{}' is not set", var)),
        None => Ok(value.to_string()),
    }
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "vigil".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn discover_config() -> Option<PathBuf> {
        // 1. Environment variable
        if let Ok(path) = std::env::var("VIGIL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Working directory
        let cwd = PathBuf::from("./vigil-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        // 3. User home
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vigil").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // 4. System config
        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/vigil/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Vigil\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VIGIL_DATABASE_URL") {
            tracing::info!("Environment override: VIGIL_DATABASE_URL (postgres backend)");
            self.spec.storage.backend = StorageKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }

        if let Ok(level) = std::env::var("VIGIL_LOG_LEVEL") {
            tracing::info!("Environment override: VIGIL_LOG_LEVEL={}", level);
            self.spec.settings.log_level = level;
        }

        if let Ok(val) = std::env::var("VIGIL_API_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: VIGIL_API_PORT={}", port);
                    self.spec.api.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for VIGIL_API_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("VIGIL_WORKERS") {
            match val.parse::<usize>() {
                Ok(workers) => {
                    tracing::info!("Environment override: VIGIL_WORKERS={}", workers);
                    self.spec.coordinator.workers = workers;
                }
                Err(_) => tracing::warn!("Invalid value for VIGIL_WORKERS: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("VIGIL_SOP_MATCH_THRESHOLD") {
            match val.parse::<f64>() {
                Ok(threshold) => {
                    tracing::info!("Environment override: VIGIL_SOP_MATCH_THRESHOLD={}", threshold);
                    self.spec.coordinator.sop_match_threshold = threshold;
                }
                Err(_) => tracing::warn!("Invalid value for VIGIL_SOP_MATCH_THRESHOLD: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("VIGIL_DRY_RUN") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: VIGIL_DRY_RUN=true");
                    self.spec.gateway.executor = ExecutorConfig::DryRun;
                }
                "false" | "0" | "no" | "off" => {}
                _ => tracing::warn!("Invalid value for VIGIL_DRY_RUN: '{}'. Expected true/false. Ignoring.", val),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;

        if spec.storage.backend == StorageKind::Postgres && spec.storage.database_url.is_none() {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        if spec.queue.max_deliveries == 0 {
            anyhow::bail!("spec.queue.max_deliveries must be at least 1");
        }

        if spec.coordinator.workers == 0 {
            anyhow::bail!("spec.coordinator.workers must be at least 1");
        }

        if !(0.0..=1.0).contains(&spec.coordinator.sop_match_threshold) {
            anyhow::bail!(
                "spec.coordinator.sop_match_threshold must be within 0.0..=1.0, got {}",
                spec.coordinator.sop_match_threshold
            );
        }

        if spec.agents.invocation_timeout.is_zero() {
            anyhow::bail!("spec.agents.invocation_timeout must be greater than zero");
        }

        for role in spec.agents.timeouts.keys() {
            if role.parse::<crate::domain::invocation::AgentRole>().is_err() {
                anyhow::bail!("spec.agents.timeouts has unknown agent role '{}'", role);
            }
        }

        let verification = &spec.verification;
        if verification.max_attempts == 0 {
            anyhow::bail!("spec.verification.max_attempts must be at least 1");
        }
        let spread = verification.poll_interval * (verification.max_attempts - 1);
        if spread > verification.wait_window {
            anyhow::bail!(
                "spec.verification: {} attempts spaced by {:?} do not fit in wait_window {:?}",
                verification.max_attempts,
                verification.poll_interval,
                verification.wait_window
            );
        }

        if spec.queue.visibility_timeout.is_zero() {
            anyhow::bail!("spec.queue.visibility_timeout must be greater than zero");
        }

        if let ExecutorConfig::Http { endpoint, .. } = &spec.gateway.executor {
            if endpoint.is_empty() {
                anyhow::bail!("spec.gateway.executor.endpoint cannot be empty");
            }
        }

        for rule in &spec.gateway.policy.rules {
            if rule.action_pattern.is_empty() {
                anyhow::bail!("spec.gateway.policy rule has an empty action_pattern");
            }
            if rule.allowed_scopes.is_empty() {
                anyhow::bail!("spec.gateway.policy rule '{}' allows no scopes", rule.action_pattern);
            }
        }

        if let TelemetryConfig::Prometheus { endpoint, .. } = &spec.telemetry {
            if endpoint.is_empty() {
                anyhow::bail!("spec.telemetry.endpoint cannot be empty");
            }
        }

        if spec.sentinel.enabled && spec.sentinel.rules.is_empty() {
            anyhow::bail!("spec.sentinel is enabled but has no rules");
        }

        if spec.analyst.enabled && spec.analyst.series.is_empty() {
            anyhow::bail!("spec.analyst is enabled but has no series");
        }

        for series in &spec.analyst.series {
            if series.capacity <= 0.0 {
                anyhow::bail!("spec.analyst series '{}' must have a positive capacity", series.metric);
            }
        }

        let mut names = std::collections::HashSet::new();
        for channel in &spec.notifications.channels {
            if !names.insert(channel.name.as_str()) {
                anyhow::bail!("Duplicate notification channel '{}'", channel.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_valid() {
        let manifest = OrchestratorConfigManifest::default();
        assert_eq!(manifest.api_version, "vigil.dev/v1");
        assert_eq!(manifest.kind, "OrchestratorConfig");
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.coordinator.sop_match_threshold, 0.6);
        assert_eq!(manifest.spec.agents.max_timeout_retries, 2);
        assert_eq!(manifest.spec.notifications.channels[0].kind, ChannelKind::Log);
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
apiVersion: vigil.dev/v1
kind: OrchestratorConfig
metadata:
  name: prod-vigil
spec:
  storage:
    backend: postgres
    database_url: postgres://vigil@localhost/vigil
  queue:
    visibility_timeout: 2m
  coordinator:
    workers: 8
    sop_match_threshold: 0.75
  agents:
    invocation_timeout: 45s
    timeouts:
      investigator: 2m
  verification:
    max_attempts: 4
    poll_interval: 5s
    wait_window: 30s
  gateway:
    executor:
      type: http
      endpoint: https://automation.internal/actions
    policy:
      rules:
        - action_pattern: "service.*"
          allowed_scopes: ["remediation:restart"]
          target_allowlist: ["checkout"]
  telemetry:
    type: prometheus
    endpoint: http://prometheus:9090
  notifications:
    channels:
      - name: oncall
        type: webhook
        url: https://hooks.internal/oncall
"#;
        let manifest = OrchestratorConfigManifest::from_yaml_str(yaml).unwrap();
        manifest.validate().unwrap();
        let spec = &manifest.spec;
        assert_eq!(spec.storage.backend, StorageKind::Postgres);
        assert_eq!(spec.queue.visibility_timeout, Duration::from_secs(120));
        assert_eq!(spec.coordinator.workers, 8);
        assert_eq!(spec.agents.timeout_for("investigator"), Duration::from_secs(120));
        assert_eq!(spec.agents.timeout_for("surgeon"), Duration::from_secs(45));
        assert_eq!(spec.gateway.policy.rules.len(), 1);
        assert!(matches!(spec.gateway.executor, ExecutorConfig::Http { .. }));
        assert!(matches!(spec.telemetry, TelemetryConfig::Prometheus { .. }));
        assert!(matches!(spec.notifications.channels[0].kind, ChannelKind::Webhook { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_threshold_and_window() {
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.coordinator.sop_match_threshold = 1.5;
        assert!(manifest.validate().is_err());

        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.verification.max_attempts = 10;
        manifest.spec.verification.poll_interval = Duration::from_secs(30);
        manifest.spec.verification.wait_window = Duration::from_secs(60);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.storage.backend = StorageKind::Postgres;
        assert!(manifest.validate().is_err());
        assert!(manifest.spec.storage.to_backend().is_err());
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil-config.yaml");
        let mut manifest = OrchestratorConfigManifest::default();
        manifest.spec.coordinator.workers = 2;
        manifest.to_yaml_file(&path).unwrap();
        let loaded = OrchestratorConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.coordinator.workers, 2);
    }
}
