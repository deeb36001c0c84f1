// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Policy
//!
//! Least-privilege rules consulted by the execution gateway before any
//! state-changing action runs. A rule is keyed by an action-type pattern:
//!
//! - `"*"` matches any action type
//! - `"service.*"` matches any action type starting with `"service."`
//! - `"service.restart"` exact match only
//!
//! An action is allowed when at least one matching rule accepts both the
//! presented credential scope and the target. No matching rule means deny.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Credential scope presented by the caller of the gateway, e.g.
/// `remediation:restart`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialScope(pub String);

impl CredentialScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("No policy rule permits action '{action_type}'")]
    NoMatchingRule { action_type: String },

    #[error("Scope '{scope}' is not permitted for action '{action_type}' (allowed: {allowed:?})")]
    ScopeNotPermitted {
        action_type: String,
        scope: String,
        allowed: Vec<String>,
    },

    #[error("Target '{target}' is outside the allowlist for action '{action_type}' (allowed: {allowed:?})")]
    TargetNotAllowed {
        action_type: String,
        target: String,
        allowed: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub action_pattern: String,
    pub allowed_scopes: Vec<String>,
    /// `None` allows any target. Entries support a trailing `*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_allowlist: Option<Vec<String>>,
}

impl PolicyRule {
    pub fn new(action_pattern: impl Into<String>, allowed_scopes: Vec<String>) -> Self {
        Self {
            action_pattern: action_pattern.into(),
            allowed_scopes,
            target_allowlist: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_allowlist = Some(targets);
        self
    }

    pub fn matches_action(&self, action_type: &str) -> bool {
        if self.action_pattern == "*" {
            return true;
        }
        if let Some(prefix) = self.action_pattern.strip_suffix(".*") {
            return action_type
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false);
        }
        action_type == self.action_pattern
    }

    pub fn allows(&self, action_type: &str, target: &str, scope: &CredentialScope) -> Result<(), PolicyViolation> {
        if !self.allowed_scopes.iter().any(|s| s == "*" || s == scope.as_str()) {
            return Err(PolicyViolation::ScopeNotPermitted {
                action_type: action_type.to_string(),
                scope: scope.to_string(),
                allowed: self.allowed_scopes.clone(),
            });
        }
        if let Some(allowlist) = &self.target_allowlist {
            if !allowlist.iter().any(|pattern| target_matches(pattern, target)) {
                return Err(PolicyViolation::TargetNotAllowed {
                    action_type: action_type.to_string(),
                    target: target.to_string(),
                    allowed: allowlist.clone(),
                });
            }
        }
        Ok(())
    }
}

fn target_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" || pattern == target {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => target.starts_with(prefix),
        None => false,
    }
}

/// Default-deny rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl ExecutionPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn deny_all() -> Self {
        Self::default()
    }

    /// The first matching rule that accepts the call, or the violation of
    /// the first matching rule when none does.
    pub fn evaluate(
        &self,
        action_type: &str,
        target: &str,
        scope: &CredentialScope,
    ) -> Result<&PolicyRule, PolicyViolation> {
        let mut first_violation = None;
        for rule in self.rules.iter().filter(|r| r.matches_action(action_type)) {
            match rule.allows(action_type, target, scope) {
                Ok(()) => return Ok(rule),
                Err(violation) => {
                    first_violation.get_or_insert(violation);
                }
            }
        }
        Err(first_violation.unwrap_or_else(|| PolicyViolation::NoMatchingRule {
            action_type: action_type.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy::new(vec![
            PolicyRule::new("service.*", vec!["remediation:restart".into()])
                .with_targets(vec!["checkout".into(), "payments-*".into()]),
            PolicyRule::new("cache.flush", vec!["remediation:cache".into()]),
        ])
    }

    #[test]
    fn prefix_rule_allows_matching_scope_and_target() {
        let scope = CredentialScope::new("remediation:restart");
        let policy = policy();
        let rule = policy.evaluate("service.restart", "payments-eu", &scope).unwrap();
        assert_eq!(rule.action_pattern, "service.*");
    }

    #[test]
    fn unknown_action_is_denied_by_default() {
        let scope = CredentialScope::new("remediation:restart");
        let err = policy().evaluate("db.drop", "checkout", &scope).unwrap_err();
        assert_eq!(err, PolicyViolation::NoMatchingRule { action_type: "db.drop".into() });
        assert!(ExecutionPolicy::deny_all().evaluate("service.restart", "x", &scope).is_err());
    }

    #[test]
    fn wrong_scope_is_denied() {
        let scope = CredentialScope::new("remediation:cache");
        assert!(matches!(
            policy().evaluate("service.restart", "checkout", &scope),
            Err(PolicyViolation::ScopeNotPermitted { .. })
        ));
    }

    #[test]
    fn target_outside_allowlist_is_denied() {
        let scope = CredentialScope::new("remediation:restart");
        assert!(matches!(
            policy().evaluate("service.restart", "ledger", &scope),
            Err(PolicyViolation::TargetNotAllowed { .. })
        ));
    }

    #[test]
    fn prefix_pattern_requires_segment_boundary() {
        let rule = PolicyRule::new("service.*", vec!["*".into()]);
        assert!(rule.matches_action("service.scale"));
        assert!(!rule.matches_action("services.scale"));
        assert!(PolicyRule::new("*", vec![]).matches_action("anything"));
    }
}
