// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use bastion_core::domain::config::{BastionConfigManifest, ProviderConfig};
use bastion_core::infrastructure::MasterKey;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./bastion-config.yaml)
        #[arg(short, long, default_value = "./bastion-config.yaml")]
        output: PathBuf,

        /// Include an example partner provider
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = BastionConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. BASTION_CONFIG_PATH: {}",
            std::env::var("BASTION_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./bastion-config.yaml");
        println!("  4. ~/.bastion/config.yaml");
        println!("  5. /etc/bastion/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Server:".bold());
    println!("  Bind: {}", spec.server.bind_address);
    println!("  Request timeout: {}s", spec.server.request_timeout_secs);
    println!("  Session cookie: {}", spec.server.session_cookie);
    println!();

    println!("{}", "Database:".bold());
    match &spec.database.url {
        Some(url) => println!("  URL: {}", redacted(url)),
        None => println!(
            "  {}@{}:{}/{}",
            spec.database.username, spec.database.host, spec.database.port, spec.database.database
        ),
    }
    println!("  TLS mode: {:?}", spec.database.tls_mode);
    if let Some(cert) = &spec.database.root_cert {
        println!("  Root cert: {}", cert.display());
    }
    println!("  Scope parameter: {}", spec.database.scope_parameter);
    println!();

    println!("{}", "Session:".bold());
    println!("  Issuer: {}", spec.session.issuer);
    println!("  Audiences: {}", spec.session.audiences.join(", "));
    if let Some(secret) = &spec.session.hs256_secret {
        println!("  HS256 secret: {}", redacted(secret));
    }
    if let Some(path) = &spec.session.rs256_public_key_path {
        println!("  RS256 public key: {}", path.display());
    }
    println!();

    println!("{}", "Vault:".bold());
    println!("  Master key: {}", redacted(&spec.vault.master_key));
    println!();

    println!("{}", "Providers:".bold());
    if spec.providers.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for provider in &spec.providers {
        println!("  {} → {}", provider.name.bold(), provider.base_url);
        println!("    Timeout: {}s", provider.timeout_secs);
        if let Some(rps) = provider.requests_per_second {
            println!("    Pacing: {} req/s", rps);
        }
    }
    println!();

    println!("{}", "Outbound:".bold());
    println!("  Max retries: {}", spec.outbound.max_retries);
    println!("  Signature TTL: {}s", spec.outbound.signature_ttl_secs);
    if spec.outbound.strict_tls {
        println!("  Strict TLS: {}", "on".green());
    } else {
        println!("  Strict TLS: {}", "off".red());
    }
    println!();

    println!("{}", "Rate limit:".bold());
    println!(
        "  {} requests / {}s per tenant and route",
        spec.rate_limit.default_limit, spec.rate_limit.window_secs
    );
    println!("  Routes: {}", config.routes().len());
    println!();

    Ok(())
}

/// `env:` references are shown as-is, literals are masked.
fn redacted(value: &str) -> String {
    if value.starts_with("env:") {
        value.to_string()
    } else {
        "(inline, hidden)".to_string()
    }
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = BastionConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let mut config = BastionConfigManifest::default();
    if with_examples {
        config.spec.providers.push(ProviderConfig {
            name: "bank-api".to_string(),
            base_url: "https://bank.example.com/api/".to_string(),
            timeout_secs: 10,
            requests_per_second: Some(5),
        });
    }

    config
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    println!();
    println!("Export the secrets it references before running `bastion serve`:");
    println!("  export BASTION_MASTER_KEY={}", MasterKey::generate_base64());
    println!("  export BASTION_SESSION_SECRET=<at least 32 bytes shared with the auth service>");

    Ok(())
}
