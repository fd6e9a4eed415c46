// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Bastion CLI
//!
//! The `bastion` binary runs the tenant gateway and carries the operator
//! tooling around it.
//!
//! ## Commands
//!
//! - `bastion serve` - Run the HTTP gateway
//! - `bastion config show|validate|generate` - Configuration management
//! - `bastion db check|migrate` - Database TLS diagnostics and schema migrations
//! - `bastion vault put|rotate|revoke|list|release` - Partner credential operations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use bastion_cli::commands::{self, ConfigCommand, DbCommand, VaultCommand};

/// Bastion - tenant isolation and credential broker
#[derive(Parser)]
#[command(name = "bastion")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "BASTION_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BASTION_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    #[command(name = "serve")]
    Serve {
        #[command(flatten)]
        command: commands::ServeCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Database diagnostics and migrations
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },

    /// Partner credential operations
    #[command(name = "vault")]
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve { command }) => commands::serve::execute(command, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Db { command }) => commands::db::handle_command(command, cli.config).await,
        Some(Commands::Vault { command }) => {
            commands::vault::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
