// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Incident Summary Template Engine
//!
//! Renders the Clerk's incident summaries with Handlebars. Operators can
//! replace the built-in template through `spec.clerk.template_path`.
//!
//! # Available Placeholders
//!
//! - `{{task_id}}`, `{{target}}`, `{{trigger}}`, `{{priority}}`, `{{outcome}}`
//! - `{{root_cause}}`, `{{confidence}}`, `{{matched_sop}}`
//! - `{{#each actions}}` with `action_type`, `target`, `deduplicated`
//! - `{{#each verification}}` with `attempt`, `healthy`, `detail`
//! - `{{escalation}}` - human readable escalation reason
//! - `{{#each timeline}}` with `role`, `attempt`, `outcome`, `duration_ms`
//! - `{{started_at}}`, `{{finished_at}}`

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryAction {
    pub action_type: String,
    pub target: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryCheck {
    pub attempt: u32,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStep {
    pub role: String,
    pub attempt: u32,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Context data for summary rendering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryContext {
    pub task_id: String,
    pub target: String,
    pub trigger: String,
    pub priority: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_sop: Option<String>,
    pub actions: Vec<SummaryAction>,
    pub verification: Vec<SummaryCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<String>,
    pub timeline: Vec<SummaryStep>,
    pub started_at: String,
    pub finished_at: String,
}

const DEFAULT_TEMPLATE: &str = "\
# Incident {{task_id}}: {{outcome}}

- Target: {{target}}
- Trigger: {{trigger}} ({{priority}})
- Window: {{started_at}} to {{finished_at}}

## Root cause
{{#if root_cause}}{{root_cause}}{{#if confidence}} (confidence {{confidence}}){{/if}}{{else}}Not determined.{{/if}}

## Remediation
{{#if matched_sop}}SOP: {{matched_sop}}
{{#each actions}}- {{action_type}} on {{target}}{{#if deduplicated}} (already executed){{/if}}
{{/each}}{{else}}No known remediation was applied.
{{/if}}
{{#if verification}}## Verification
{{#each verification}}- check {{attempt}}: {{#if healthy}}healthy{{else}}unhealthy{{/if}}, {{detail}}
{{/each}}{{/if}}
{{#if escalation}}## Escalation
{{escalation}}
{{/if}}
## Timeline
{{#each timeline}}- {{role}} attempt {{attempt}}: {{outcome}}{{#if duration_ms}} in {{duration_ms}} ms{{/if}}
{{/each}}";

pub struct SummaryTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl SummaryTemplateEngine {
    const TEMPLATE_NAME: &'static str = "incident_summary";

    /// Engine with the built-in template.
    pub fn new() -> Result<Self> {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    pub fn with_template(template: &str) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        // Missing optional fields render as empty
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(Self::TEMPLATE_NAME, template)
            .context("Invalid incident summary template")?;
        Ok(Self { handlebars })
    }

    /// Engine using the template at `path`, or the built-in one.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let template = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read summary template {:?}", path))?;
                Self::with_template(&template)
            }
            None => Self::new(),
        }
    }

    pub fn render(&self, context: &SummaryContext) -> Result<String> {
        self.handlebars
            .render(Self::TEMPLATE_NAME, context)
            .context("Failed to render incident summary")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_context() -> SummaryContext {
        SummaryContext {
            task_id: "t-1".into(),
            target: "checkout".into(),
            trigger: "alert:HighCpu".into(),
            priority: "urgent".into(),
            outcome: "resolved".into(),
            root_cause: Some("cpu_usage on checkout at 97.0 (baseline 80.0)".into()),
            confidence: Some("0.85".into()),
            matched_sop: Some("restart-service".into()),
            actions: vec![SummaryAction {
                action_type: "service.restart".into(),
                target: "checkout".into(),
                deduplicated: false,
            }],
            verification: vec![SummaryCheck { attempt: 1, healthy: true, detail: "cpu_usage 41.0".into() }],
            escalation: None,
            timeline: vec![SummaryStep {
                role: "investigator".into(),
                attempt: 1,
                outcome: "success".into(),
                duration_ms: Some(12),
            }],
            started_at: "2026-01-01T00:00:00Z".into(),
            finished_at: "2026-01-01T00:05:00Z".into(),
        }
    }

    #[test]
    fn default_template_renders_resolution() {
        let engine = SummaryTemplateEngine::new().unwrap();
        let text = engine.render(&resolved_context()).unwrap();
        assert!(text.contains("# Incident t-1: resolved"));
        assert!(text.contains("SOP: restart-service"));
        assert!(text.contains("- service.restart on checkout"));
        assert!(text.contains("investigator attempt 1: success in 12 ms"));
        assert!(!text.contains("## Escalation"));
    }

    #[test]
    fn escalation_without_root_cause_is_rendered() {
        let engine = SummaryTemplateEngine::new().unwrap();
        let mut context = resolved_context();
        context.outcome = "escalated".into();
        context.root_cause = None;
        context.matched_sop = None;
        context.actions.clear();
        context.escalation = Some("No known remediation matched the root cause".into());
        let text = engine.render(&context).unwrap();
        assert!(text.contains("Not determined."));
        assert!(text.contains("No known remediation was applied."));
        assert!(text.contains("## Escalation"));
    }

    #[test]
    fn custom_template_is_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.hbs");
        std::fs::write(&path, "{{target}} -> {{outcome}}").unwrap();
        let engine = SummaryTemplateEngine::from_path(Some(&path)).unwrap();
        assert_eq!(engine.render(&resolved_context()).unwrap(), "checkout -> resolved");
    }

    #[test]
    fn invalid_template_is_rejected() {
        assert!(SummaryTemplateEngine::with_template("{{#each items}}never closed").is_err());
    }
}
