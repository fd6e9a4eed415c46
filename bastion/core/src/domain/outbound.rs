// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound partner calls
//!
//! Request/response types for the
//! [`crate::application::outbound_proxy::OutboundProxy`]. Callers describe a
//! call with a [`RequestSpec`] and get back a [`ProviderResponse`]; they never
//! see a [`SignedRequest`] or any key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::credential::{ProviderId, VaultError};
use crate::domain::tenant::{SessionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller wants sent to a partner. `path` is relative to the
/// provider's configured base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            headers: BTreeMap::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A fully signed outbound request. Built immediately before dispatch and
/// dropped right after; traces back to exactly one security context.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub credential_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
    /// Dispatch attempts made, including retries
    pub attempts: u32,
    pub credential_version: u32,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream rejected request with status {status}")]
    Upstream4xx { status: u16, body: Value },

    #[error("upstream failed with status {status}")]
    Upstream5xx { status: u16, body: Value },

    #[error("upstream call timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// Partner rejected our signature (401/403). Retried once after a forced
    /// credential refresh before surfacing.
    #[error("upstream rejected request signature with status {status}")]
    SignatureRejected { status: u16 },

    #[error("network failure after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("security context lacks capability '{0}'")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl ProxyError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProxyError::Upstream4xx { status, .. }
            | ProxyError::Upstream5xx { status, .. }
            | ProxyError::SignatureRejected { status } => Some(*status),
            _ => None,
        }
    }
}

/// Per-provider outbound settings resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub provider: ProviderId,
    pub base_url: url::Url,
    pub timeout: std::time::Duration,
    /// Pacing limit; `None` means unpaced
    pub requests_per_second: Option<u32>,
}
