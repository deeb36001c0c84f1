// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Commands
//!
//! `vigil db migrate` applies the embedded PostgreSQL migrations so the
//! schema matches the binary; `vigil db status` only reports.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! vigil db migrate
//!
//! # Preview migrations without applying
//! vigil db migrate --dry-run
//! ```
//!
//! The connection string comes from `spec.storage.database_url` or
//! `VIGIL_DATABASE_URL`.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use vigil_core::domain::config::OrchestratorConfigManifest;
use vigil_core::domain::repository::{PostgresConfig, StorageBackend};
use vigil_core::infrastructure::db::{Database, MIGRATOR};

#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply pending migrations
    Migrate {
        /// List pending migrations without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied and available migrations
    Status,
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = postgres_config(config_path)?;

    println!("Connecting to database...");
    let db = Database::new(&PostgresConfig {
        max_connections: 1,
        ..config
    })
    .await?;

    let (applied, available) = db.migration_status().await?;
    println!("Migration status: {} applied, {} total available.", applied, available);

    match command {
        DbCommand::Status => Ok(()),
        DbCommand::Migrate { dry_run } => migrate(&db, applied, available, dry_run).await,
    }
}

fn postgres_config(config_path: Option<PathBuf>) -> Result<PostgresConfig> {
    let manifest = OrchestratorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    match manifest.spec.storage.to_backend()? {
        StorageBackend::PostgreSQL(config) => Ok(config),
        StorageBackend::InMemory => anyhow::bail!(
            "spec.storage.backend is in_memory; set it to postgres or export VIGIL_DATABASE_URL"
        ),
    }
}

async fn migrate(db: &Database, applied: usize, available: usize, dry_run: bool) -> Result<()> {
    if applied >= available {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in MIGRATOR.iter().skip(applied) {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    db.migrate().await?;
    println!("{}", "✓ Database updated successfully.".green());
    Ok(())
}
