// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Commands
//!
//! `bastion db check` connects with the configured TLS mode and reports what
//! the server actually negotiated. `bastion db migrate` applies the schema
//! migrations bundled with `bastion-core`.
//!
//! # Usage
//!
//! ```bash
//! # Verify the connection is encrypted
//! bastion db check --require-tls
//!
//! # Preview migrations without applying
//! bastion db migrate --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use bastion_core::infrastructure::db::{Database, TlsReport, MIGRATOR};

#[derive(Subcommand)]
pub enum DbCommand {
    /// Connect and report the negotiated TLS parameters
    Check {
        /// Exit with an error when the session is not encrypted
        #[arg(long)]
        require_tls: bool,
    },

    /// Apply pending schema migrations
    Migrate {
        /// Perform a dry run without applying changes
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;

    println!("Connecting to database...");
    let db = Database::connect(&config.spec.database).await?;

    match command {
        DbCommand::Check { require_tls } => check(&db, require_tls).await,
        DbCommand::Migrate { dry_run } => migrate(&db, dry_run).await,
    }
}

async fn check(db: &Database, require_tls: bool) -> Result<()> {
    let report = db.tls_report().await?;
    print_report(&report);
    tls_verdict(&report, require_tls)
}

fn print_report(report: &TlsReport) {
    println!("{}", "Database connection:".bold());
    println!("  Server version: {}", report.server_version);
    if report.ssl {
        println!("  TLS: {}", "encrypted".green());
    } else {
        println!("  TLS: {}", "plaintext".red());
    }
    println!("  Protocol: {}", report.tls_version.as_deref().unwrap_or("-"));
    println!("  Cipher: {}", report.cipher.as_deref().unwrap_or("-"));
}

fn tls_verdict(report: &TlsReport, require_tls: bool) -> Result<()> {
    if report.ssl {
        println!("{}", "✓ Connection is encrypted".green());
        return Ok(());
    }
    if require_tls {
        anyhow::bail!("Database session is not encrypted; check spec.database.tls_mode");
    }
    println!("{}", "! Connection is not encrypted".yellow());
    Ok(())
}

async fn migrate(db: &Database, dry_run: bool) -> Result<()> {
    let applied_count = sqlx::query("SELECT version FROM _sqlx_migrations")
        .fetch_all(db.get_pool())
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

    if dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in MIGRATOR.iter().skip(applied_count) {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    db.migrate().await.context("Migration failed")?;
    println!("{}", "✓ Database updated successfully.".green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(ssl: bool) -> TlsReport {
        TlsReport {
            server_version: "16.2".to_string(),
            ssl,
            tls_version: ssl.then(|| "TLSv1.3".to_string()),
            cipher: ssl.then(|| "TLS_AES_256_GCM_SHA384".to_string()),
        }
    }

    #[test]
    fn plaintext_session_fails_only_when_tls_required() {
        assert!(tls_verdict(&report(false), false).is_ok());
        assert!(tls_verdict(&report(false), true).is_err());
        assert!(tls_verdict(&report(true), true).is_ok());
    }

    #[test]
    fn bundled_migrations_are_ordered() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }
}
