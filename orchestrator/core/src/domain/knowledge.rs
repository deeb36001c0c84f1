// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Knowledge Entries
//!
//! Reusable artifacts read by the agents: standard operating procedures,
//! historical incident cases written by the Clerk, architecture facts and
//! capacity/risk findings written by the Analyst.
//!
//! The store is multi-reader / curated-writer: in-flight tasks only ever
//! *insert* new entries; changing an existing entry is an explicit curation
//! operation.
//!
//! Ranking and SOP matching live here (not in the stores) so every backend
//! orders results identically:
//!
//! - [`rank_entries`] filters and orders entries for a [`KnowledgeQuery`] and
//!   cuts a restartable page.
//! - [`SopMatcher`] decides whether a root cause has a known remediation:
//!   an exact signature hit scores `1.0`, otherwise the score is the token
//!   Jaccard similarity between the root cause and the SOP's applicability
//!   criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::agent::RootCauseHypothesis;
use crate::domain::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeEntryId(pub Uuid);

impl KnowledgeEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KnowledgeEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KnowledgeEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeCategory {
    Sop,
    HistoricalCase,
    ArchitectureFact,
    CapacityFinding,
    RiskFinding,
}

impl KnowledgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeCategory::Sop => "sop",
            KnowledgeCategory::HistoricalCase => "historical_case",
            KnowledgeCategory::ArchitectureFact => "architecture_fact",
            KnowledgeCategory::CapacityFinding => "capacity_finding",
            KnowledgeCategory::RiskFinding => "risk_finding",
        }
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sop" => Ok(KnowledgeCategory::Sop),
            "historical_case" => Ok(KnowledgeCategory::HistoricalCase),
            "architecture_fact" => Ok(KnowledgeCategory::ArchitectureFact),
            "capacity_finding" => Ok(KnowledgeCategory::CapacityFinding),
            "risk_finding" => Ok(KnowledgeCategory::RiskFinding),
            other => Err(format!("unknown knowledge category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Medium
    }
}

/// When an entry applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Applicability {
    /// Exact root-cause signatures (`<metric>:<target>`, or `<metric>:*`).
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

/// One state-changing step of an SOP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    /// Dotted action type, e.g. `service.restart`.
    pub action_type: String,
    /// Defaults to the task target when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub steps: Vec<ActionStep>,
    /// Credential scope the Surgeon presents to the gateway.
    pub credential_scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: KnowledgeEntryId,
    pub category: KnowledgeCategory,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub applicability: Applicability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Procedure>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_task: Option<TaskId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
}

fn default_author() -> String {
    "operator".to_string()
}

impl KnowledgeEntry {
    pub fn new(category: KnowledgeCategory, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: KnowledgeEntryId::new(),
            category,
            title: title.into(),
            content: content.into(),
            applicability: Applicability::default(),
            procedure: None,
            tags: Vec::new(),
            importance: Importance::default(),
            author: default_author(),
            source_task: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            access_count: 0,
        }
    }

    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    pub fn with_procedure(mut self, procedure: Procedure) -> Self {
        self.procedure = Some(procedure);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn authored_by(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.source_task = Some(task_id);
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    fn tokens(&self) -> BTreeSet<String> {
        let mut tokens = tokenize(&self.title);
        for keyword in self.applicability.keywords.iter().chain(&self.applicability.services).chain(&self.tags) {
            tokens.extend(tokenize(keyword));
        }
        tokens
    }
}

/// Filters applied on top of the category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCriteria {
    /// Root-cause signatures; an entry whose applicability matches one of
    /// them ranks first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    /// All listed tags must be present.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<Importance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<KnowledgeCategory>,
    #[serde(default)]
    pub criteria: QueryCriteria,
    /// Offset returned as `next_cursor` by the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

impl KnowledgeQuery {
    pub fn category(category: KnowledgeCategory) -> Self {
        Self {
            category: Some(category),
            criteria: QueryCriteria::default(),
            cursor: None,
            limit: default_limit(),
        }
    }

    pub fn with_criteria(mut self, criteria: QueryCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn starting_at(mut self, cursor: Option<usize>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePage {
    pub entries: Vec<KnowledgeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeStatistics {
    pub total: usize,
    pub expired: usize,
    pub by_category: BTreeMap<String, usize>,
}

impl KnowledgeStatistics {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a KnowledgeEntry>, now: DateTime<Utc>) -> Self {
        let mut stats = KnowledgeStatistics::default();
        for entry in entries {
            stats.total += 1;
            if entry.is_expired(now) {
                stats.expired += 1;
            }
            *stats.by_category.entry(entry.category.to_string()).or_insert(0) += 1;
        }
        stats
    }
}

/// Lowercased alphanumeric tokens of `text`. Separators are anything else.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Relevance of `entry` for `criteria`, in `0.0..=1.0`.
pub fn relevance(entry: &KnowledgeEntry, criteria: &QueryCriteria) -> f64 {
    let exact = criteria.signatures.iter().any(|signature| {
        entry
            .applicability
            .signatures
            .iter()
            .any(|pattern| signature_matches(pattern, signature))
    });
    if exact {
        return 1.0;
    }
    let mut wanted = BTreeSet::new();
    for word in criteria.keywords.iter().chain(&criteria.services) {
        wanted.extend(tokenize(word));
    }
    if wanted.is_empty() {
        return 0.0;
    }
    let service_hit = criteria.services.iter().any(|svc| {
        entry
            .applicability
            .services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(svc))
    });
    let overlap = entry.tokens().intersection(&wanted).count() as f64 / wanted.len() as f64;
    let score = if service_hit { 0.5 + overlap / 2.0 } else { overlap };
    score.min(1.0)
}

/// Filter, rank and page `entries` for `query`.
///
/// Order: relevance desc, importance desc, newest first. Expired entries and
/// entries missing a required tag are dropped.
pub fn rank_entries(entries: Vec<KnowledgeEntry>, query: &KnowledgeQuery, now: DateTime<Utc>) -> KnowledgePage {
    let criteria = &query.criteria;
    let mut scored: Vec<(f64, KnowledgeEntry)> = entries
        .into_iter()
        .filter(|e| query.category.map(|c| c == e.category).unwrap_or(true))
        .filter(|e| !e.is_expired(now))
        .filter(|e| criteria.tags.iter().all(|tag| e.has_tag(tag)))
        .filter(|e| criteria.min_importance.map(|min| e.importance >= min).unwrap_or(true))
        .map(|e| (relevance(&e, criteria), e))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.importance.cmp(&a.importance))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.0.cmp(&b.id.0))
    });

    let start = query.cursor.unwrap_or(0);
    let limit = query.limit.max(1);
    let total = scored.len();
    let entries: Vec<KnowledgeEntry> = scored.into_iter().skip(start).take(limit).map(|(_, e)| e).collect();
    let end = start + entries.len();
    KnowledgePage {
        entries,
        next_cursor: if end < total { Some(end) } else { None },
    }
}

/// A root cause matched to a known SOP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SopMatch {
    pub entry_id: KnowledgeEntryId,
    pub title: String,
    pub score: f64,
    pub exact: bool,
}

/// Decides "known remediation available?" for a root cause.
#[derive(Debug, Clone)]
pub struct SopMatcher {
    threshold: f64,
}

impl SopMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold: threshold.clamp(0.0, 1.0) }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score one SOP against a root cause.
    pub fn score(&self, root_cause: &RootCauseHypothesis, sop: &KnowledgeEntry) -> (f64, bool) {
        if sop.applicability.signatures.iter().any(|s| signature_matches(s, &root_cause.signature)) {
            return (1.0, true);
        }
        let mut cause_tokens = tokenize(&root_cause.summary);
        for word in root_cause.keywords.iter().chain(&root_cause.affected_scope) {
            cause_tokens.extend(tokenize(word));
        }
        let mut sop_tokens = BTreeSet::new();
        for word in sop.applicability.keywords.iter().chain(&sop.applicability.services) {
            sop_tokens.extend(tokenize(word));
        }
        (jaccard(&cause_tokens, &sop_tokens), false)
    }

    /// Best executable SOP scoring at or above the threshold.
    pub fn best_match(&self, root_cause: &RootCauseHypothesis, candidates: &[KnowledgeEntry]) -> Option<SopMatch> {
        candidates
            .iter()
            .filter(|e| e.category == KnowledgeCategory::Sop && e.procedure.is_some())
            .map(|e| {
                let (score, exact) = self.score(root_cause, e);
                SopMatch { entry_id: e.id, title: e.title.clone(), score, exact }
            })
            .filter(|m| m.score >= self.threshold)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
    }
}

fn signature_matches(pattern: &str, signature: &str) -> bool {
    if pattern.eq_ignore_ascii_case(signature) {
        return true;
    }
    match pattern.strip_suffix(":*") {
        Some(metric) => signature
            .split_once(':')
            .map(|(m, _)| m.eq_ignore_ascii_case(metric))
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn restart_sop() -> KnowledgeEntry {
        KnowledgeEntry::new(KnowledgeCategory::Sop, "restart-service", "Restart the service")
            .with_applicability(Applicability {
                signatures: vec!["cpu_usage:*".into()],
                keywords: vec!["cpu".into(), "saturation".into()],
                services: vec!["checkout".into()],
            })
            .with_procedure(Procedure {
                steps: vec![ActionStep {
                    action_type: "service.restart".into(),
                    target: None,
                    parameters: serde_json::json!({}),
                }],
                credential_scope: "remediation:restart".into(),
            })
    }

    fn hypothesis(signature: &str, summary: &str) -> RootCauseHypothesis {
        RootCauseHypothesis {
            summary: summary.into(),
            signature: signature.into(),
            keywords: vec![],
            confidence: 0.8,
            affected_scope: vec![],
            evidence: vec![],
        }
    }

    #[test]
    fn wildcard_signature_is_an_exact_match() {
        let matcher = SopMatcher::new(0.6);
        let found = matcher
            .best_match(&hypothesis("cpu_usage:checkout", "cpu high"), &[restart_sop()])
            .expect("match");
        assert!(found.exact);
        assert_eq!(found.score, 1.0);
        assert_eq!(found.title, "restart-service");
    }

    #[test]
    fn similarity_below_threshold_is_no_match() {
        let matcher = SopMatcher::new(0.6);
        let cause = hypothesis("disk_usage:db", "disk full on db volume");
        assert!(matcher.best_match(&cause, &[restart_sop()]).is_none());
    }

    #[test]
    fn similarity_above_threshold_matches() {
        let matcher = SopMatcher::new(0.5);
        let mut cause = hypothesis("latency:checkout", "cpu saturation");
        cause.affected_scope = vec!["checkout".into()];
        let found = matcher.best_match(&cause, &[restart_sop()]).expect("match");
        assert!(!found.exact);
        assert!(found.score >= 0.5);
    }

    #[test]
    fn exact_signature_survives_the_candidate_limit() {
        let now = Utc::now();
        let mut entries: Vec<KnowledgeEntry> = (0..30)
            .map(|i| {
                KnowledgeEntry::new(KnowledgeCategory::Sop, format!("cpu-playbook-{}", i), "x").with_applicability(
                    Applicability {
                        keywords: vec!["cpu".into(), "saturation".into()],
                        services: vec!["checkout".into()],
                        ..Default::default()
                    },
                )
            })
            .collect();
        let mut exact = restart_sop();
        exact.applicability.keywords = vec!["throttling".into()];
        exact.applicability.services = vec![];
        entries.push(exact.clone());

        let criteria = QueryCriteria {
            keywords: vec!["cpu".into(), "saturation".into()],
            services: vec!["checkout".into()],
            ..Default::default()
        };
        let by_keywords = KnowledgeQuery::category(KnowledgeCategory::Sop)
            .with_criteria(criteria.clone())
            .with_limit(10);
        let page = rank_entries(entries.clone(), &by_keywords, now);
        assert!(page.entries.iter().all(|e| e.id != exact.id));

        let with_signature = KnowledgeQuery::category(KnowledgeCategory::Sop)
            .with_criteria(QueryCriteria {
                signatures: vec!["cpu_usage:checkout".into()],
                ..criteria
            })
            .with_limit(10);
        let page = rank_entries(entries, &with_signature, now);
        assert_eq!(page.entries[0].id, exact.id);

        let found = SopMatcher::new(0.6)
            .best_match(&hypothesis("cpu_usage:checkout", "cpu high"), &page.entries)
            .expect("match");
        assert!(found.exact);
        assert_eq!(found.entry_id, exact.id);
    }

    #[test]
    fn entries_without_procedure_never_match() {
        let mut sop = restart_sop();
        sop.procedure = None;
        let matcher = SopMatcher::new(0.1);
        assert!(matcher.best_match(&hypothesis("cpu_usage:checkout", "cpu"), &[sop]).is_none());
    }

    #[test]
    fn ranking_orders_by_relevance_and_pages() {
        let now = Utc::now();
        let relevant = restart_sop();
        let other = KnowledgeEntry::new(KnowledgeCategory::Sop, "rotate-logs", "Rotate logs")
            .with_applicability(Applicability {
                keywords: vec!["disk".into()],
                ..Default::default()
            });
        let expired = KnowledgeEntry::new(KnowledgeCategory::Sop, "old cpu fix", "obsolete")
            .expiring_at(now - Duration::minutes(1));
        let query = KnowledgeQuery::category(KnowledgeCategory::Sop)
            .with_criteria(QueryCriteria {
                keywords: vec!["cpu".into()],
                services: vec!["checkout".into()],
                ..Default::default()
            })
            .with_limit(1);

        let page = rank_entries(vec![other.clone(), expired, relevant.clone()], &query, now);
        assert_eq!(page.entries, vec![relevant]);
        assert_eq!(page.next_cursor, Some(1));

        let next = rank_entries(
            vec![other.clone(), restart_sop()],
            &query.clone().starting_at(page.next_cursor),
            now,
        );
        assert_eq!(next.entries[0].title, "rotate-logs");
        assert_eq!(next.next_cursor, None);
    }

    #[test]
    fn ranking_filters_tags_and_importance() {
        let now = Utc::now();
        let tagged = KnowledgeEntry::new(KnowledgeCategory::RiskFinding, "risk", "x")
            .with_tags(["capacity"])
            .with_importance(Importance::High);
        let untagged = KnowledgeEntry::new(KnowledgeCategory::RiskFinding, "risk2", "y")
            .with_importance(Importance::Critical);
        let low = KnowledgeEntry::new(KnowledgeCategory::RiskFinding, "risk3", "z")
            .with_tags(["capacity"])
            .with_importance(Importance::Low);
        let query = KnowledgeQuery::category(KnowledgeCategory::RiskFinding).with_criteria(QueryCriteria {
            tags: vec!["capacity".into()],
            min_importance: Some(Importance::High),
            ..Default::default()
        });
        let page = rank_entries(vec![tagged.clone(), untagged, low], &query, now);
        assert_eq!(page.entries, vec![tagged]);
    }

    #[test]
    fn statistics_count_categories_and_expiry() {
        let now = Utc::now();
        let entries = vec![
            restart_sop(),
            KnowledgeEntry::new(KnowledgeCategory::HistoricalCase, "case", "c").expiring_at(now),
        ];
        let stats = KnowledgeStatistics::from_entries(&entries, now);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.by_category.get("sop"), Some(&1));
    }
}
