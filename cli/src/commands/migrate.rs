// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `aegis-identity migrate`: bring the PostgreSQL schema up to date.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;

use aegis_identity_core::domain::identity_config::IdentityConfigManifest;
use aegis_identity_core::infrastructure::repositories::postgres::MIGRATOR;

#[derive(Args)]
pub struct MigrateCommand {
    /// Database URL (default: spec.storage.database_url from the config)
    #[arg(long, env = "AEGIS_IDENTITY_DATABASE_URL", value_name = "URL")]
    database_url: Option<String>,

    /// List pending migrations without applying them
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "AEGIS Identity Migrate".bold().green());

    let database_url = match cmd.database_url {
        Some(url) => url,
        None => IdentityConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?
            .spec
            .storage
            .database_url
            .context("No database URL: set AEGIS_IDENTITY_DATABASE_URL or spec.storage.database_url")?,
    };

    println!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    // The bookkeeping table does not exist before the first run.
    let applied_count = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success")
        .fetch_all(&pool)
        .await
        .map(|rows| rows.len())
        .unwrap_or(0);

    let total_migrations = MIGRATOR.iter().count();
    println!(
        "Migration status: {} applied, {} total available.",
        applied_count, total_migrations
    );

    if applied_count >= total_migrations {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if cmd.dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in MIGRATOR.iter().skip(applied_count) {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    MIGRATOR.run(&pool).await.context("Failed to apply migrations")?;
    println!("{}", "✓ Database updated successfully.".green());

    Ok(())
}
