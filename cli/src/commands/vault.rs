// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Partner credential commands
//!
//! Operate on the credential table shared with running gateways. Rotation
//! here is seen by a gateway on its next refresh (at the latest after the
//! partner rejects a stale signature). Quarantine lives in gateway memory, so
//! `release` is sent to the gateway over HTTP.
//!
//! Secrets are read from an environment variable or stdin, never from argv.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Subcommand;
use colored::Colorize;
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use bastion_core::application::CredentialVault;
use bastion_core::domain::config::BastionConfigManifest;
use bastion_core::domain::credential::{CredentialMetadata, ProviderId, RotationState};
use bastion_core::infrastructure::db::Database;
use bastion_core::infrastructure::repositories::PostgresCredentialRepository;
use bastion_core::infrastructure::SecurityAuditLogger;

#[derive(Subcommand)]
pub enum VaultCommand {
    /// Store the first secret for a provider
    Put {
        provider: String,

        /// Read the secret from this environment variable instead of stdin
        #[arg(long, value_name = "VAR")]
        secret_env: Option<String>,

        /// Expire the credential after this many days
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// Replace a provider's secret
    Rotate {
        provider: String,

        #[arg(long, value_name = "VAR")]
        secret_env: Option<String>,

        /// Only stage the new secret; finish with `vault activate`
        #[arg(long)]
        stage: bool,
    },

    /// Activate a staged secret
    Activate { provider: String },

    /// Discard a staged secret
    Abort { provider: String },

    /// Block all further use of a provider's credential
    Revoke { provider: String },

    /// List stored credentials (metadata only)
    List,

    /// Lift a decryption quarantine on a running gateway
    Release {
        provider: String,

        /// Gateway base URL (default: http://<server.bind_address>)
        #[arg(long)]
        gateway: Option<String>,

        /// Session token carrying the vault.admin capability
        #[arg(long, env = "BASTION_ADMIN_TOKEN", hide_env_values = true)]
        token: String,
    },
}

pub async fn handle_command(command: VaultCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;

    match command {
        VaultCommand::Put {
            provider,
            secret_env,
            expires_in_days,
        } => {
            let provider = ProviderId::new(provider)?;
            let secret = read_secret(secret_env.as_deref()).await?;
            let expires_at = expires_in_days.map(|days| Utc::now() + Duration::days(days));
            let metadata = open_vault(&config).await?.put(&provider, &secret, expires_at).await?;
            println!("{}", format!("✓ Stored {} version {}", provider, metadata.version).green());
        }
        VaultCommand::Rotate {
            provider,
            secret_env,
            stage,
        } => {
            let provider = ProviderId::new(provider)?;
            let secret = read_secret(secret_env.as_deref()).await?;
            let vault = open_vault(&config).await?;
            if stage {
                let metadata = vault.begin_rotation(&provider, &secret).await?;
                println!(
                    "{}",
                    format!(
                        "✓ Staged new secret for {}; version {} stays active until `bastion vault activate {}`",
                        provider, metadata.version, provider
                    )
                    .green()
                );
            } else {
                let ack = vault.rotate(&provider, &secret).await?;
                println!(
                    "{}",
                    format!("✓ Rotated {}: v{} → v{}", provider, ack.previous_version, ack.version).green()
                );
            }
        }
        VaultCommand::Activate { provider } => {
            let provider = ProviderId::new(provider)?;
            let ack = open_vault(&config).await?.complete_rotation(&provider).await?;
            println!(
                "{}",
                format!("✓ Activated {}: v{} → v{}", provider, ack.previous_version, ack.version).green()
            );
        }
        VaultCommand::Abort { provider } => {
            let provider = ProviderId::new(provider)?;
            let metadata = open_vault(&config).await?.abort_rotation(&provider).await?;
            println!(
                "{}",
                format!("✓ Discarded staged secret; {} stays on version {}", provider, metadata.version).green()
            );
        }
        VaultCommand::Revoke { provider } => {
            let provider = ProviderId::new(provider)?;
            let metadata = open_vault(&config).await?.revoke(&provider).await?;
            println!(
                "{}",
                format!("✓ Revoked {} at version {}", provider, metadata.version).yellow()
            );
        }
        VaultCommand::List => {
            let credentials = open_vault(&config).await?.list().await?;
            if credentials.is_empty() {
                println!("{}", "No credentials stored.".dimmed());
            }
            for metadata in &credentials {
                println!("{}", describe(metadata));
            }
        }
        VaultCommand::Release {
            provider,
            gateway,
            token,
        } => {
            let base_url = gateway.unwrap_or_else(|| format!("http://{}", config.spec.server.bind_address));
            release(&GatewayClient::new(base_url)?, &provider, &token).await?;
        }
    }

    Ok(())
}

async fn open_vault(config: &BastionConfigManifest) -> Result<CredentialVault> {
    let master_key = super::master_key(config)?;
    let db = Database::connect(&config.spec.database).await?;
    Ok(CredentialVault::new(
        Arc::new(PostgresCredentialRepository::new(db.get_pool().clone())),
        master_key,
        Arc::new(SecurityAuditLogger::new()),
    ))
}

async fn read_secret(secret_env: Option<&str>) -> Result<Vec<u8>> {
    let raw = match secret_env {
        Some(var) => std::env::var(var).with_context(|| format!("Environment variable not set: {}", var))?,
        None => {
            eprintln!("Reading secret from stdin...");
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read secret from stdin")?;
            buf
        }
    };
    let secret = raw.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        anyhow::bail!("Secret is empty");
    }
    Ok(secret.as_bytes().to_vec())
}

fn describe(metadata: &CredentialMetadata) -> String {
    let state = match metadata.rotation_state {
        RotationState::Active => metadata.rotation_state.as_str().green(),
        RotationState::Rotating => metadata.rotation_state.as_str().yellow(),
        RotationState::Revoked => metadata.rotation_state.as_str().red(),
    };
    let mut line = format!(
        "  {} v{} {} created {}",
        metadata.provider.as_str().bold(),
        metadata.version,
        state,
        metadata.created_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(rotated_at) = metadata.rotated_at {
        line.push_str(&format!(", rotated {}", rotated_at.format("%Y-%m-%d %H:%M")));
    }
    if let Some(expires_at) = metadata.expires_at {
        line.push_str(&format!(", expires {}", expires_at.format("%Y-%m-%d %H:%M")));
    }
    line
}

async fn release(client: &GatewayClient, provider: &str, token: &str) -> Result<()> {
    let released = client.release_quarantine(provider, token).await?;
    if released {
        println!("{}", format!("✓ Quarantine lifted for {}", provider).green());
    } else {
        println!("{} was not quarantined", provider);
    }
    Ok(())
}

/// HTTP client for the operator endpoints of a running gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn release_quarantine(&self, provider: &str, token: &str) -> Result<bool> {
        let response = self
            .client
            .post(format!(
                "{}/v1/providers/{}/quarantine/release",
                self.base_url, provider
            ))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to reach gateway")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gateway refused release ({}): {}", status, error_text);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse release response")?;
        Ok(body["released"].as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn secret_from_env_drops_trailing_newline() {
        std::env::set_var("BASTION_TEST_VAULT_SECRET", "s3cret\n");
        let secret = read_secret(Some("BASTION_TEST_VAULT_SECRET")).await.unwrap();
        assert_eq!(secret, b"s3cret");
    }

    #[tokio::test]
    async fn unset_secret_env_is_an_error() {
        assert!(read_secret(Some("BASTION_TEST_SURELY_UNSET_SECRET")).await.is_err());
    }

    #[test]
    fn describe_shows_state_and_version() {
        let metadata = CredentialMetadata {
            provider: ProviderId::new("bank-api").unwrap(),
            version: 3,
            rotation_state: RotationState::Revoked,
            created_at: Utc::now(),
            rotated_at: None,
            expires_at: None,
        };
        let line = describe(&metadata);
        assert!(line.contains("bank-api"));
        assert!(line.contains("v3"));
        assert!(line.contains("revoked"));
    }

    #[tokio::test]
    async fn release_posts_bearer_token_to_gateway() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/providers/bank-api/quarantine/release")
            .match_header("authorization", "Bearer admin-token")
            .with_status(200)
            .with_body(r#"{"provider":"bank-api","released":true}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(format!("{}/", server.url())).unwrap();
        assert!(client.release_quarantine("bank-api", "admin-token").await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn refused_release_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/providers/bank-api/quarantine/release")
            .with_status(403)
            .with_body(r#"{"error":"missing capability","code":"forbidden"}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(server.url()).unwrap();
        let err = client.release_quarantine("bank-api", "tenant-token").await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
