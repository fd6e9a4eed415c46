// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Secure Outbound Request Proxy
//!
//! Signs and dispatches partner API calls on behalf of a [`SecurityContext`].
//! Callers describe the call with a [`RequestSpec`]; signing material comes
//! from the [`CredentialVault`] and is dropped before the response returns.
//!
//! # Retry policy
//!
//! | Outcome | Action |
//! |---------|--------|
//! | 2xx | parsed JSON returned |
//! | connect / request / timeout failure | retried with exponential backoff up to `max_retries` |
//! | 401 / 403 | one forced `vault.refresh`, re-sign, retry; a second rejection is terminal `Upstream4xx` |
//! | other 4xx | terminal `Upstream4xx` |
//! | 5xx | terminal `Upstream5xx` (not retried: partner writes are not idempotent) |

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::credential_vault::CredentialVault;
use crate::domain::config::OutboundConfig;
use crate::domain::credential::ProviderId;
use crate::domain::outbound::{HttpMethod, ProviderEndpoint, ProviderResponse, ProxyError, RequestSpec, SignedRequest};
use crate::domain::security_context::{Capability, SecurityContext};
use crate::infrastructure::audit::{SecurityAuditLogger, SecurityIncident};
use crate::infrastructure::signing::{sign_request, SigningInput};

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct ProviderRoute {
    endpoint: ProviderEndpoint,
    pacer: Option<DefaultDirectRateLimiter>,
}

/// Result of one dispatch attempt.
enum Attempt {
    Response { status: u16, body: Bytes },
    Transient(reqwest::Error),
    Failed(reqwest::Error),
}

pub struct OutboundProxy {
    vault: Arc<CredentialVault>,
    routes: HashMap<ProviderId, ProviderRoute>,
    client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
    deadline: Option<Duration>,
    audit: Arc<SecurityAuditLogger>,
}

impl OutboundProxy {
    pub fn new(
        vault: Arc<CredentialVault>,
        endpoints: Vec<ProviderEndpoint>,
        config: &OutboundConfig,
        audit: Arc<SecurityAuditLogger>,
    ) -> anyhow::Result<Self> {
        if !config.strict_tls {
            warn!("Outbound certificate verification is DISABLED; never run this way in production");
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("bastion/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!config.strict_tls)
            .build()
            .context("Failed to create outbound HTTP client")?;

        let routes = endpoints
            .into_iter()
            .map(|endpoint| {
                let pacer = endpoint
                    .requests_per_second
                    .and_then(NonZeroU32::new)
                    .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
                (endpoint.provider.clone(), ProviderRoute { endpoint, pacer })
            })
            .collect();

        Ok(Self {
            vault,
            routes,
            client,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            deadline: None,
            audit,
        })
    }

    /// Cancel calls (including retries and backoff) that run longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn providers(&self) -> Vec<&ProviderId> {
        let mut providers: Vec<&ProviderId> = self.routes.keys().collect();
        providers.sort();
        providers
    }

    /// Sign and send `spec` to `provider` on behalf of `context`.
    ///
    /// Requires the `providers.<name>` capability.
    pub async fn call(
        &self,
        context: &SecurityContext,
        provider: &str,
        spec: RequestSpec,
    ) -> Result<ProviderResponse, ProxyError> {
        let provider_id =
            ProviderId::new(provider).map_err(|_| ProxyError::UnknownProvider(provider.to_string()))?;
        let route = self
            .routes
            .get(&provider_id)
            .ok_or_else(|| ProxyError::UnknownProvider(provider.to_string()))?;

        let action = Capability::provider(provider_id.as_str());
        if !context.permits(&action) {
            return Err(ProxyError::Forbidden(action));
        }

        let result = self.dispatch_with_retries(context, route, &spec).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(ProxyError::Upstream4xx { .. }) => "upstream_4xx",
            Err(ProxyError::Upstream5xx { .. }) => "upstream_5xx",
            Err(ProxyError::Timeout { .. }) => "timeout",
            Err(ProxyError::Network { .. }) => "network",
            Err(_) => "error",
        };
        metrics::counter!(
            "bastion_proxy_calls_total",
            "provider" => provider_id.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn dispatch_with_retries(
        &self,
        context: &SecurityContext,
        route: &ProviderRoute,
        spec: &RequestSpec,
    ) -> Result<ProviderResponse, ProxyError> {
        let provider = &route.endpoint.provider;
        let url = join_url(&route.endpoint.base_url, &spec.path)?;
        let body = spec
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ProxyError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        let headers: Vec<(String, String)> =
            spec.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut transient_failures: u32 = 0;
        let mut refreshed = false;

        loop {
            let remaining = self.remaining(started);
            if remaining == Some(Duration::ZERO) {
                return Err(ProxyError::Timeout { attempts });
            }

            if let Some(pacer) = &route.pacer {
                match remaining {
                    Some(left) => {
                        if tokio::time::timeout(left, pacer.until_ready()).await.is_err() {
                            return Err(ProxyError::Timeout { attempts });
                        }
                    }
                    None => pacer.until_ready().await,
                }
            }

            // credential is fetched per attempt and dropped once signed
            let signed = {
                let credential = self.vault.get(provider).await?;
                sign_request(
                    &credential,
                    SigningInput {
                        method: spec.method,
                        url: &url,
                        headers: &headers,
                        body: body.clone(),
                        timestamp: Utc::now(),
                        tenant_id: context.tenant_id(),
                        session_id: context.session_id(),
                    },
                )
            };

            let timeout = match self.remaining(started) {
                Some(left) => route.endpoint.timeout.min(left),
                None => route.endpoint.timeout,
            };
            attempts += 1;
            metrics::counter!("bastion_proxy_attempts_total", "provider" => provider.to_string()).increment(1);

            match self.send(&signed, timeout).await? {
                Attempt::Response { status, body } => match status {
                    200..=299 => {
                        let body = parse_success_body(&body)?;
                        debug!(
                            provider = %provider,
                            tenant_id = %signed.tenant_id,
                            status,
                            attempts,
                            "Outbound call succeeded"
                        );
                        return Ok(ProviderResponse {
                            status,
                            body,
                            attempts,
                            credential_version: signed.credential_version,
                        });
                    }
                    401 | 403 if !refreshed => {
                        warn!(
                            provider = %provider,
                            status,
                            credential_version = signed.credential_version,
                            "Partner rejected signature; refreshing credential and retrying once"
                        );
                        refreshed = true;
                        self.vault.refresh(provider).await?;
                    }
                    401 | 403 => {
                        self.audit.record(SecurityIncident::SignatureRejected {
                            provider: provider.clone(),
                            status,
                            credential_version: signed.credential_version,
                            tenant_id: signed.tenant_id,
                            session_id: signed.session_id,
                        });
                        return Err(ProxyError::Upstream4xx {
                            status,
                            body: parse_error_body(&body),
                        });
                    }
                    400..=499 => {
                        return Err(ProxyError::Upstream4xx {
                            status,
                            body: parse_error_body(&body),
                        })
                    }
                    500..=599 => {
                        return Err(ProxyError::Upstream5xx {
                            status,
                            body: parse_error_body(&body),
                        })
                    }
                    other => {
                        return Err(ProxyError::InvalidResponse(format!(
                            "unexpected status {}",
                            other
                        )))
                    }
                },
                Attempt::Failed(e) => {
                    warn!(provider = %provider, attempts, "Outbound call failed: {}", e);
                    return Err(ProxyError::Network {
                        attempts,
                        message: e.to_string(),
                    });
                }
                Attempt::Transient(e) => {
                    if transient_failures >= self.max_retries {
                        warn!(provider = %provider, attempts, "Outbound call failed: {}", e);
                        return Err(if e.is_timeout() {
                            ProxyError::Timeout { attempts }
                        } else {
                            ProxyError::Network {
                                attempts,
                                message: e.to_string(),
                            }
                        });
                    }
                    let mut delay = backoff(self.base_delay, transient_failures);
                    if let Some(left) = self.remaining(started) {
                        delay = delay.min(left);
                    }
                    transient_failures += 1;
                    info!(
                        provider = %provider,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient outbound failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send(&self, signed: &SignedRequest, timeout: Duration) -> Result<Attempt, ProxyError> {
        let mut request = self
            .client
            .request(to_reqwest_method(signed.method), &signed.url)
            .timeout(timeout);
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &signed.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(ProxyError::InvalidRequest(e.to_string())),
            Err(e) if is_transient(&e) => return Ok(Attempt::Transient(e)),
            Err(e) => return Ok(Attempt::Failed(e)),
        };
        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => Ok(Attempt::Response { status, body }),
            Err(e) if e.is_timeout() => Ok(Attempt::Transient(e)),
            Err(e) => Err(ProxyError::InvalidResponse(e.to_string())),
        }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(started.elapsed()))
    }
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

fn backoff(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(1u32 << retry.min(16)).min(MAX_BACKOFF)
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Resolve `path` against the provider base URL. The result must stay on the
/// provider's origin.
fn join_url(base: &url::Url, path: &str) -> Result<url::Url, ProxyError> {
    let relative = path.trim_start_matches('/');
    let joined = base
        .join(relative)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid path '{}': {}", path, e)))?;
    if joined.origin() != base.origin() {
        return Err(ProxyError::InvalidRequest(format!(
            "path '{}' escapes the provider origin",
            path
        )));
    }
    Ok(joined)
}

fn parse_success_body(body: &[u8]) -> Result<Value, ProxyError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ProxyError::InvalidResponse(format!("expected JSON body: {}", e)))
}

fn parse_error_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::security_context::security_context::tests::context_for;
    use crate::domain::tenant::TenantId;
    use crate::infrastructure::crypto::MasterKey;
    use crate::infrastructure::repositories::InMemoryCredentialRepository;

    fn endpoint(base: &str) -> ProviderEndpoint {
        ProviderEndpoint {
            provider: ProviderId::new("bank-api").unwrap(),
            base_url: url::Url::parse(base).unwrap(),
            timeout: Duration::from_secs(2),
            requests_per_second: None,
        }
    }

    async fn proxy(base: &str) -> OutboundProxy {
        let audit = Arc::new(SecurityAuditLogger::new());
        let vault = Arc::new(CredentialVault::new(
            Arc::new(InMemoryCredentialRepository::new()),
            MasterKey::from_bytes(&[3u8; 32]).unwrap(),
            audit.clone(),
        ));
        vault
            .put(&ProviderId::new("bank-api").unwrap(), b"secret", None)
            .await
            .unwrap();
        let config = OutboundConfig {
            base_delay_ms: 1,
            ..OutboundConfig::default()
        };
        OutboundProxy::new(vault, vec![endpoint(base)], &config, audit).unwrap()
    }

    #[test]
    fn test_join_url_stays_on_origin() {
        let base = url::Url::parse("https://bank.example.com/api/").unwrap();
        assert_eq!(
            join_url(&base, "/v1/balance?x=1").unwrap().as_str(),
            "https://bank.example.com/api/v1/balance?x=1"
        );
        // protocol-relative paths are treated as relative to the base
        assert_eq!(
            join_url(&base, "//evil.example.net/x").unwrap().host_str(),
            Some("bank.example.com")
        );
        assert!(join_url(&base, "https://evil.example.net/").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 0), Duration::from_millis(100));
        assert_eq!(backoff(base, 3), Duration::from_millis(800));
        assert_eq!(backoff(base, 20), MAX_BACKOFF);
    }

    #[test]
    fn test_error_body_falls_back_to_text() {
        assert_eq!(parse_error_body(b"not json"), Value::String("not json".into()));
        assert_eq!(parse_error_body(b""), Value::Null);
        assert!(parse_success_body(b"<html>").is_err());
    }

    #[tokio::test]
    async fn test_unknown_provider_and_missing_capability() {
        let proxy = proxy("https://bank.example.com/").await;
        let ctx = context_for(TenantId::new(), &["ledger.*"]);

        assert!(matches!(
            proxy.call(&ctx, "tax-api", RequestSpec::get("/x")).await,
            Err(ProxyError::UnknownProvider(_))
        ));
        match proxy.call(&ctx, "bank-api", RequestSpec::get("/x")).await {
            Err(ProxyError::Forbidden(action)) => assert_eq!(action, "providers.bank-api"),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_returns_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/balance")
            .match_header("x-bastion-credential-version", "1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"balance": 1200}"#)
            .create_async()
            .await;

        let proxy = proxy(&server.url()).await;
        let ctx = context_for(TenantId::new(), &["providers.*"]);
        let response = proxy.call(&ctx, "bank-api", RequestSpec::get("/v1/balance")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body["balance"], 1200);
        assert_eq!(response.attempts, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_retries_then_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let proxy = proxy(&format!("http://127.0.0.1:{}/", port)).await;
        let ctx = context_for(TenantId::new(), &["*"]);

        match proxy.call(&ctx, "bank-api", RequestSpec::get("/ping")).await {
            Err(ProxyError::Network { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected Network, got {:?}", other),
        }
    }
}
