// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Knowledge store commands
//!
//! Commands: add, query, stats

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::daemon::client::KnowledgeFilter;
use crate::daemon::{ClientTarget, DaemonClient};

#[derive(Subcommand)]
pub enum KnowledgeCommand {
    /// Add entries from a YAML or JSON file (a single entry or a list)
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Query the knowledge store
    Query {
        /// Category (sop, historical_case, architecture_fact, capacity_finding, risk_finding)
        #[arg(long)]
        category: Option<String>,

        /// Free-text keywords
        #[arg(value_name = "KEYWORDS")]
        keywords: Vec<String>,

        /// Comma-separated services
        #[arg(long)]
        service: Option<String>,

        /// Comma-separated tags, all required
        #[arg(long)]
        tag: Option<String>,

        /// Minimum importance (low, medium, high, critical)
        #[arg(long)]
        min_importance: Option<String>,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Restart cursor from a previous page
        #[arg(long)]
        cursor: Option<usize>,
    },

    /// Entry counts per category
    Stats,
}

pub async fn handle_command(command: KnowledgeCommand, target: ClientTarget) -> Result<()> {
    let client = DaemonClient::new(&target)?;
    match command {
        KnowledgeCommand::Add { file } => add(&client, &file).await,
        KnowledgeCommand::Query {
            category,
            keywords,
            service,
            tag,
            min_importance,
            limit,
            cursor,
        } => {
            let filter = KnowledgeFilter {
                category,
                q: (!keywords.is_empty()).then(|| keywords.join(" ")),
                service,
                tag,
                min_importance,
                limit: Some(limit),
                cursor,
            };
            query(&client, &filter).await
        }
        KnowledgeCommand::Stats => stats(&client).await,
    }
}

/// Entries in a file: a single mapping or a sequence of them.
pub fn read_entries(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let parsed: serde_json::Value =
        serde_yaml::from_str(&raw).with_context(|| format!("{:?} is neither JSON nor YAML", path))?;
    match parsed {
        serde_json::Value::Array(entries) => Ok(entries),
        entry @ serde_json::Value::Object(_) => Ok(vec![entry]),
        other => anyhow::bail!("Expected a knowledge entry or a list of entries, found {}", other),
    }
}

async fn add(client: &DaemonClient, file: &Path) -> Result<()> {
    let entries = read_entries(file)?;
    for raw in &entries {
        let entry = client.add_knowledge(raw).await?;
        println!(
            "{} {} [{}] {}",
            "✓".green(),
            entry.id,
            entry.category,
            entry.title.bold()
        );
    }
    println!("Added {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

async fn query(client: &DaemonClient, filter: &KnowledgeFilter) -> Result<()> {
    let page = client.query_knowledge(filter).await?;
    if page.entries.is_empty() {
        println!("{}", "No matching entries".yellow());
        return Ok(());
    }

    for entry in &page.entries {
        println!("{} [{}] {}", entry.id.to_string().dimmed(), entry.category, entry.title.bold());
        if !entry.applicability.services.is_empty() {
            println!("    services: {}", entry.applicability.services.join(", "));
        }
        if !entry.tags.is_empty() {
            println!("    tags: {}", entry.tags.join(", "));
        }
        if let Some(procedure) = &entry.procedure {
            let steps: Vec<&str> = procedure.steps.iter().map(|s| s.action_type.as_str()).collect();
            println!("    procedure ({}): {}", procedure.credential_scope, steps.join(" -> "));
        }
    }
    if let Some(cursor) = page.next_cursor {
        println!();
        println!("More results: --cursor {}", cursor);
    }
    Ok(())
}

async fn stats(client: &DaemonClient) -> Result<()> {
    let stats = client.knowledge_stats().await?;
    println!("{}", "Knowledge store".bold());
    println!("  Total: {}", stats.total);
    println!("  Expired (pending purge): {}", stats.expired);
    for (category, count) in &stats.by_category {
        println!("  {}: {}", category, count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_files_hold_one_or_many_entries() {
        let dir = tempfile::tempdir().unwrap();

        let single = dir.path().join("sop.yaml");
        std::fs::write(
            &single,
            "category: sop\ntitle: Restart checkout\ncontent: Restart the deployment\n\
             procedure:\n  credential_scope: remediation:restart\n  steps:\n    - action_type: service.restart\n",
        )
        .unwrap();
        let entries = read_entries(&single).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["procedure"]["steps"][0]["action_type"], "service.restart");

        let many = dir.path().join("facts.json");
        std::fs::write(
            &many,
            r#"[{"category":"architecture_fact","title":"a","content":"x"},
                {"category":"architecture_fact","title":"b","content":"y"}]"#,
        )
        .unwrap();
        assert_eq!(read_entries(&many).unwrap().len(), 2);

        let scalar = dir.path().join("bad.yaml");
        std::fs::write(&scalar, "just a string").unwrap();
        assert!(read_entries(&scalar).is_err());
    }
}
