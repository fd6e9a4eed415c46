// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Bastion Configuration Types
//
// Defines the configuration manifest consumed by the bastion core:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Database connection and TLS mode
// - Session proof verification keys
// - Vault master key reference
// - Partner provider endpoints and outbound retry policy
// - Rate limiting and route shape rules
//
// Secrets are never written inline in production manifests; any string
// field documented as a secret accepts "env:VAR_NAME".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::credential::ProviderId;
use crate::domain::guard::RouteShape;
use crate::domain::outbound::{HttpMethod, ProviderEndpoint};
use crate::domain::scoping::DEFAULT_SCOPE_PARAMETER;

pub const API_VERSION: &str = "bastion.dev/v1";
pub const KIND: &str = "BastionConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BastionConfigManifest {
    /// API version (must be "bastion.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "BastionConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: BastionConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Deployment name (e.g. "bastion-prod-eu")
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BastionConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    /// Partner API endpoints
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Route shape rules; empty means the built-in API routes
    #[serde(default)]
    pub routes: Vec<RouteShape>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Deadline applied to each request's scoped transaction and outbound call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Cookie carrying the session proof when no Authorization header is sent
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_timeout_secs: default_request_timeout_secs(),
            session_cookie: default_session_cookie(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL (supports "env:VAR_NAME"). Overrides the discrete fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub username: String,

    /// Password (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_db_name")]
    pub database: String,

    #[serde(default)]
    pub tls_mode: TlsMode,

    /// CA bundle for verify-ca / verify-full
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cert: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Transaction-local parameter consulted by row filtering
    #[serde(default = "default_scope_parameter")]
    pub scope_parameter: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            username: default_db_user(),
            password: None,
            database: default_db_name(),
            tls_mode: TlsMode::default(),
            root_cert: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            scope_parameter: default_scope_parameter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audiences")]
    pub audiences: Vec<String>,

    /// HS256 shared secret (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs256_secret: Option<String>,

    /// RS256 public key PEM file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rs256_public_key_path: Option<PathBuf>,

    /// Clock skew tolerated past `exp`
    #[serde(default)]
    pub leeway_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audiences: default_audiences(),
            hs256_secret: Some("env:BASTION_SESSION_SECRET".to_string()),
            rs256_public_key_path: None,
            leeway_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Base64 encoded 32-byte AES-256-GCM key (supports "env:VAR_NAME")
    #[serde(default = "default_master_key")]
    pub master_key: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key: default_master_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (e.g. "bank-api"); must match the vaulted credential
    pub name: String,

    pub base_url: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Retries after the first attempt for transient network failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// How long a signature stays valid at the partner
    #[serde(default = "default_signature_ttl_secs")]
    pub signature_ttl_secs: u64,

    /// Certificate verification strictness. Only non-production
    /// environments should ever turn this off.
    #[serde(default = "default_strict_tls")]
    pub strict_tls: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            signature_ttl_secs: default_signature_ttl_secs(),
            strict_tls: default_strict_tls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_limit")]
    pub default_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            default_limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus scrape listener, e.g. "0.0.0.0:9464"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_listen: Option<String>,
}

impl Default for BastionConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "bastion".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: BastionConfigSpec::default(),
        }
    }
}

/// Resolve a config value (supports "env:VAR_NAME" syntax)
pub fn resolve_secret(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
        None => Ok(value.to_string()),
    }
}

/// Built-in route shapes for the HTTP API in [`crate::presentation::api`].
pub fn default_routes() -> Vec<RouteShape> {
    vec![
        RouteShape::new(HttpMethod::Get, "/v1/accounts"),
        RouteShape::new(HttpMethod::Post, "/v1/accounts").json(&["name", "currency"]),
        RouteShape::new(HttpMethod::Get, "/v1/accounts/{id}/entries"),
        RouteShape::new(HttpMethod::Post, "/v1/accounts/{id}/entries").json(&["amount_minor"]),
        RouteShape::new(HttpMethod::Post, "/v1/providers/{provider}/calls").json(&["method", "path"]),
        RouteShape::new(HttpMethod::Post, "/v1/providers/{provider}/quarantine/release"),
    ]
}

impl BastionConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. BASTION_CONFIG_PATH environment variable
    /// 2. ./bastion-config.yaml (working directory)
    /// 3. ~/.bastion/config.yaml (user home)
    /// 4. /etc/bastion/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BASTION_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./bastion-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bastion").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/bastion/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path: fail if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("BASTION_DATABASE_URL") {
            tracing::info!("Environment override: BASTION_DATABASE_URL");
            self.spec.database.url = Some(url);
        }

        if let Ok(val) = std::env::var("BASTION_STRICT_TLS") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: BASTION_STRICT_TLS=true");
                    self.spec.outbound.strict_tls = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::warn!("Environment override: BASTION_STRICT_TLS=false (certificate verification disabled)");
                    self.spec.outbound.strict_tls = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for BASTION_STRICT_TLS: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let session = &self.spec.session;
        if session.hs256_secret.is_none() && session.rs256_public_key_path.is_none() {
            anyhow::bail!("spec.session requires hs256_secret or rs256_public_key_path");
        }
        if session.hs256_secret.is_some() && session.rs256_public_key_path.is_some() {
            anyhow::bail!("spec.session must set only one of hs256_secret or rs256_public_key_path");
        }
        if session.issuer.is_empty() || session.audiences.is_empty() {
            anyhow::bail!("spec.session issuer and audiences cannot be empty");
        }

        let db = &self.spec.database;
        if matches!(db.tls_mode, TlsMode::VerifyCa | TlsMode::VerifyFull) && db.root_cert.is_none() {
            anyhow::bail!("spec.database.root_cert is required for tls_mode {:?}", db.tls_mode);
        }
        if db.max_connections == 0 {
            anyhow::bail!("spec.database.max_connections must be at least 1");
        }
        if db.scope_parameter.is_empty() || !db.scope_parameter.contains('.') {
            anyhow::bail!("spec.database.scope_parameter must be a dotted custom parameter name");
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.spec.providers {
            ProviderId::new(provider.name.clone())
                .map_err(|e| anyhow::anyhow!("Invalid provider in spec.providers: {}", e))?;
            if !seen.insert(provider.name.as_str()) {
                anyhow::bail!("Duplicate provider '{}'", provider.name);
            }
            let url = url::Url::parse(&provider.base_url)
                .map_err(|e| anyhow::anyhow!("Invalid base_url for provider {}: {}", provider.name, e))?;
            if url.scheme() != "https" && self.spec.outbound.strict_tls {
                anyhow::bail!(
                    "Provider {} must use https while outbound.strict_tls is enabled",
                    provider.name
                );
            }
        }

        if self.spec.rate_limit.window_secs == 0 {
            anyhow::bail!("spec.rate_limit.window_secs must be at least 1");
        }

        Ok(())
    }

    /// Resolved provider endpoints for the outbound proxy.
    pub fn provider_endpoints(&self) -> anyhow::Result<Vec<ProviderEndpoint>> {
        self.spec
            .providers
            .iter()
            .map(|p| -> anyhow::Result<ProviderEndpoint> {
                Ok(ProviderEndpoint {
                    provider: ProviderId::new(p.name.clone())?,
                    base_url: url::Url::parse(&p.base_url)?,
                    timeout: Duration::from_secs(p.timeout_secs),
                    requests_per_second: p.requests_per_second,
                })
            })
            .collect()
    }

    /// Configured routes, or the built-in set.
    pub fn routes(&self) -> Vec<RouteShape> {
        if self.spec.routes.is_empty() {
            default_routes()
        } else {
            self.spec.routes.clone()
        }
    }
}


fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_session_cookie() -> String {
    "bastion_session".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "bastion".to_string()
}

fn default_db_name() -> String {
    "bastion".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_scope_parameter() -> String {
    DEFAULT_SCOPE_PARAMETER.to_string()
}

fn default_issuer() -> String {
    "bastion-auth".to_string()
}

fn default_audiences() -> Vec<String> {
    vec!["bastion-api".to_string()]
}

fn default_master_key() -> String {
    "env:BASTION_MASTER_KEY".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_signature_ttl_secs() -> u64 {
    300
}

fn default_strict_tls() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_limit() -> u32 {
    120
}
