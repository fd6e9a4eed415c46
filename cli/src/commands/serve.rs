// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `bastion serve`
//!
//! Wires the core services from the manifest and runs the HTTP gateway until
//! Ctrl+C or SIGTERM.
//!
//! - PostgreSQL backend by default; `--in-memory` for local development
//! - Prometheus scrape listener when `spec.observability.metrics_listen` is set
//! - Expired rate-limit windows are pruned once per window

use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use bastion_core::application::{
    AccessGuard, CredentialVault, OutboundProxy, SecurityContextManager, TenantScopedExecutor,
};
use bastion_core::domain::config::{resolve_secret, BastionConfigManifest};
use bastion_core::domain::repository::CredentialRepository;
use bastion_core::domain::scoping::{LedgerStatements, TransactionSource};
use bastion_core::domain::security_context::SessionProofVerifier;
use bastion_core::infrastructure::db::Database;
use bastion_core::infrastructure::repositories::{
    InMemoryCredentialRepository, PostgresCredentialRepository,
};
use bastion_core::infrastructure::scoped_storage::{InMemoryScopedStore, PgTransactionSource};
use bastion_core::infrastructure::session_activity::InMemorySessionActivityRepository;
use bastion_core::infrastructure::{JwtSessionVerifier, SecurityAuditLogger};
use bastion_core::presentation::api::{app, AppState};

#[derive(Args)]
pub struct ServeCommand {
    /// Override spec.server.bind_address
    #[arg(long, env = "BASTION_BIND_ADDRESS")]
    bind: Option<String>,

    /// Keep ledger and credentials in process memory (development only)
    #[arg(long)]
    in_memory: bool,

    /// Apply pending migrations before serving
    #[arg(long)]
    migrate: bool,
}

/// Services shared by both storage backends.
struct Services {
    guard: Arc<AccessGuard>,
    audit: Arc<SecurityAuditLogger>,
}

pub async fn execute(cmd: ServeCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    info!("Configuration loaded: name={}", config.metadata.name);

    if let Some(listen) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics_listen.as_deref())
    {
        install_metrics_exporter(listen)?;
    }

    let services = build_services(&config)?;
    let bind = cmd
        .bind
        .clone()
        .unwrap_or_else(|| config.spec.server.bind_address.clone());

    if cmd.in_memory {
        warn!("Serving from process memory; data is lost on exit");
        let vault = build_vault(&config, Arc::new(InMemoryCredentialRepository::new()), &services)?;
        let executor = build_executor(&config, InMemoryScopedStore::new(), &services);
        return run(&config, services, vault, executor, &bind).await;
    }

    let db = Database::connect(&config.spec.database).await?;
    if cmd.migrate {
        db.migrate().await?;
        info!("Migrations applied");
    }
    let vault = build_vault(
        &config,
        Arc::new(PostgresCredentialRepository::new(db.get_pool().clone())),
        &services,
    )?;
    let executor = build_executor(
        &config,
        PgTransactionSource::new(db.get_pool().clone()),
        &services,
    );
    run(&config, services, vault, executor, &bind).await
}

fn build_services(config: &BastionConfigManifest) -> Result<Services> {
    let audit = Arc::new(SecurityAuditLogger::new());
    let session = &config.spec.session;
    let contexts = Arc::new(
        SecurityContextManager::new(
            session_verifier(config)?,
            Arc::new(InMemorySessionActivityRepository::new()),
            audit.clone(),
        )
        .with_leeway_secs(session.leeway_secs),
    );
    let guard = Arc::new(AccessGuard::new(
        contexts,
        config.routes(),
        &config.spec.rate_limit,
        config.spec.server.session_cookie.clone(),
    ));
    Ok(Services { guard, audit })
}

fn session_verifier(config: &BastionConfigManifest) -> Result<Arc<dyn SessionProofVerifier>> {
    let session = &config.spec.session;
    let audiences: Vec<&str> = session.audiences.iter().map(String::as_str).collect();

    let verifier = match (&session.hs256_secret, &session.rs256_public_key_path) {
        (Some(secret), None) => {
            let secret = resolve_secret(secret).context("Failed to resolve spec.session.hs256_secret")?;
            JwtSessionVerifier::hs256(secret.as_bytes(), &session.issuer, &audiences)?
        }
        (None, Some(path)) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read session public key {:?}", path))?;
            JwtSessionVerifier::rs256(&pem, &session.issuer, &audiences)?
        }
        _ => anyhow::bail!("spec.session requires exactly one of hs256_secret or rs256_public_key_path"),
    };
    Ok(Arc::new(verifier))
}

fn build_vault(
    config: &BastionConfigManifest,
    repository: Arc<dyn CredentialRepository>,
    services: &Services,
) -> Result<Arc<CredentialVault>> {
    let ttl = chrono::Duration::seconds(config.spec.outbound.signature_ttl_secs as i64);
    Ok(Arc::new(
        CredentialVault::new(repository, super::master_key(config)?, services.audit.clone())
            .with_credential_ttl(ttl),
    ))
}

fn build_executor<S: TransactionSource>(
    config: &BastionConfigManifest,
    source: S,
    services: &Services,
) -> Arc<TenantScopedExecutor<S>> {
    Arc::new(
        TenantScopedExecutor::new(source, services.audit.clone())
            .with_scope_parameter(config.spec.database.scope_parameter.clone())
            .with_deadline(request_timeout(config)),
    )
}

fn request_timeout(config: &BastionConfigManifest) -> Duration {
    Duration::from_secs(config.spec.server.request_timeout_secs)
}

async fn run<S>(
    config: &BastionConfigManifest,
    services: Services,
    vault: Arc<CredentialVault>,
    executor: Arc<TenantScopedExecutor<S>>,
    bind: &str,
) -> Result<()>
where
    S: TransactionSource + 'static,
    S::Connection: LedgerStatements + 'static,
{
    let proxy = OutboundProxy::new(
        vault.clone(),
        config.provider_endpoints()?,
        &config.spec.outbound,
        services.audit.clone(),
    )?
    .with_deadline(request_timeout(config));
    info!("Outbound providers: {}", config.spec.providers.len());

    let pruner = spawn_bucket_pruner(
        services.guard.clone(),
        Duration::from_secs(config.spec.rate_limit.window_secs),
    );

    let state = Arc::new(AppState {
        guard: services.guard,
        executor,
        proxy: Arc::new(proxy),
        vault,
    });

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Bastion listening on {}", bind);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    pruner.abort();
    info!("Bastion shutting down");
    Ok(())
}

fn spawn_bucket_pruner(guard: Arc<AccessGuard>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = guard.prune_expired(chrono::Utc::now());
            if pruned > 0 {
                debug!("Pruned {} expired rate-limit windows", pruned);
            }
        }
    })
}

fn install_metrics_exporter(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("Invalid observability.metrics_listen '{}'", listen))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    describe_metrics();
    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "bastion_guard_rejections_total",
        "Inbound requests rejected by the access guard, by stage"
    );
    metrics::describe_counter!(
        "bastion_context_builds_total",
        "Security context builds, by outcome"
    );
    metrics::describe_counter!(
        "bastion_scoped_transactions_total",
        "Tenant-scoped units of work, by outcome"
    );
    metrics::describe_counter!(
        "bastion_vault_rotations_total",
        "Completed credential rotations"
    );
    metrics::describe_counter!(
        "bastion_proxy_calls_total",
        "Outbound partner calls, by provider and outcome"
    );
    metrics::describe_counter!(
        "bastion_proxy_attempts_total",
        "Outbound HTTP attempts including retries"
    );
    metrics::describe_counter!(
        "bastion_security_incidents_total",
        "Security incidents recorded by the audit logger, by kind"
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_secret(var: &str) -> BastionConfigManifest {
        let mut config = BastionConfigManifest::default();
        config.spec.session.hs256_secret = Some(format!("env:{}", var));
        config
    }

    #[test]
    fn verifier_needs_resolvable_secret() {
        let config = config_with_secret("BASTION_TEST_SURELY_UNSET_SESSION");
        assert!(session_verifier(&config).is_err());
    }

    #[test]
    fn verifier_rejects_short_secret() {
        std::env::set_var("BASTION_TEST_SHORT_SESSION", "too-short");
        let config = config_with_secret("BASTION_TEST_SHORT_SESSION");
        assert!(session_verifier(&config).is_err());
    }

    #[tokio::test]
    async fn in_memory_services_wire_up() {
        std::env::set_var("BASTION_TEST_SERVE_SESSION", "serve-test-session-secret-32-bytes!!");
        std::env::set_var("BASTION_TEST_SERVE_MASTER_KEY", bastion_core::infrastructure::MasterKey::generate_base64());
        let mut config = config_with_secret("BASTION_TEST_SERVE_SESSION");
        config.spec.vault.master_key = "env:BASTION_TEST_SERVE_MASTER_KEY".to_string();

        let services = build_services(&config).unwrap();
        let vault = build_vault(&config, Arc::new(InMemoryCredentialRepository::new()), &services).unwrap();
        let executor = build_executor(&config, InMemoryScopedStore::new(), &services);

        assert!(vault.list().await.unwrap().is_empty());
        assert_eq!(executor.source().statements_executed(), 0);
        assert_eq!(services.guard.tracked_buckets(), 0);
    }
}
