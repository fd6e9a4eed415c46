// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype built from
//! [`DatabaseConfig`]. Pooled connections clear the tenant scope parameter on
//! release; a connection whose reset fails is discarded instead of reused.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Row;
use tracing::{info, warn};

use crate::domain::config::{resolve_secret, DatabaseConfig, TlsMode};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Result of `bastion db check`.
#[derive(Debug, Clone)]
pub struct TlsReport {
    pub server_version: String,
    pub ssl: bool,
    pub tls_version: Option<String>,
    pub cipher: Option<String>,
}

fn ssl_mode(mode: TlsMode) -> PgSslMode {
    match mode {
        TlsMode::Disable => PgSslMode::Disable,
        TlsMode::Prefer => PgSslMode::Prefer,
        TlsMode::Require => PgSslMode::Require,
        TlsMode::VerifyCa => PgSslMode::VerifyCa,
        TlsMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Connection options from config. A `url` wins over the discrete fields;
/// `tls_mode` and `root_cert` apply either way.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let options = match &config.url {
        Some(url) => {
            let url = resolve_secret(url)?;
            PgConnectOptions::from_str(&url).context("Invalid database url")?
        }
        None => {
            let mut options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.username)
                .database(&config.database);
            if let Some(password) = &config.password {
                options = options.password(&resolve_secret(password)?);
            }
            options
        }
    };

    let mut options = options.ssl_mode(ssl_mode(config.tls_mode));
    if let Some(root_cert) = &config.root_cert {
        options = options.ssl_root_cert(root_cert);
    }
    Ok(options)
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let scope_parameter = config.scope_parameter.clone();

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .after_release(move |conn, _meta| {
                let parameter = scope_parameter.clone();
                Box::pin(async move {
                    let reset = sqlx::query("SELECT set_config($1, '', false)")
                        .bind(&parameter)
                        .execute(&mut *conn)
                        .await;
                    match reset {
                        Ok(_) => Ok(true),
                        Err(e) => {
                            warn!("Discarding pooled connection, scope reset failed: {}", e);
                            Ok(false)
                        }
                    }
                })
            })
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!(
            "Connected to PostgreSQL (tls_mode={:?}, max_connections={})",
            config.tls_mode, config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Negotiated TLS parameters of a pooled connection.
    pub async fn tls_report(&self) -> Result<TlsReport> {
        let row = sqlx::query(
            r#"
            SELECT current_setting('server_version') AS server_version,
                   s.ssl, s.version AS tls_version, s.cipher
            FROM pg_stat_ssl s
            WHERE s.pid = pg_backend_pid()
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to query pg_stat_ssl")?;

        Ok(TlsReport {
            server_version: row.try_get("server_version")?,
            ssl: row.try_get("ssl")?,
            tls_version: row.try_get("tls_version")?,
            cipher: row.try_get("cipher")?,
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.context("Failed to apply migrations")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            host: "db.internal".to_string(),
            tls_mode: TlsMode::Require,
            ..Default::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5432);
    }

    #[test]
    fn test_connect_options_url_wins() {
        let config = DatabaseConfig {
            url: Some("postgres://app@10.0.0.5:6543/ledger".to_string()),
            ..Default::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "10.0.0.5");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("ledger"));
    }

    #[test]
    fn test_connect_options_rejects_unset_env_password() {
        let config = DatabaseConfig {
            password: Some("env:BASTION_TEST_SURELY_UNSET_PASSWORD".to_string()),
            ..Default::default()
        };
        assert!(connect_options(&config).is_err());
    }
}
