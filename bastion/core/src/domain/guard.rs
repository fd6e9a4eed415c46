// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Access Guard Types
//!
//! The guard is an ordered chain of tagged stages. Each stage returns a
//! [`StageOutcome`]: continue to the next stage, or a terminal
//! [`GuardRejection`]. The order is fixed by [`GuardStage::ORDER`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::outbound::HttpMethod;
use crate::domain::security_context::AuthError;

/// Framework-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: HttpMethod,
    pub path: String,
    /// Header names are lower-cased on construction
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = Bytes::from(serde_json::to_vec(body).unwrap_or_default());
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Bearer token from `Authorization`, falling back to the session cookie.
    pub fn session_token(&self, cookie_name: &str) -> Option<String> {
        if let Some(auth) = self.header("authorization") {
            if let Some(token) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
        self.header("cookie").and_then(|cookies| {
            cookies.split(';').find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == cookie_name && !value.is_empty()).then(|| value.to_string())
            })
        })
    }

    /// Tenant id the *client* claims, from header or body. Never trusted.
    pub fn claimed_tenant(&self) -> Option<String> {
        if let Some(header) = self.header("x-tenant-id") {
            return Some(header.to_string());
        }
        self.json_body()
            .and_then(|body| body.get("tenant_id").and_then(|v| v.as_str()).map(str::to_string))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStage {
    Authenticate,
    RateLimit,
    ValidateShape,
}

impl GuardStage {
    pub const ORDER: [GuardStage; 3] = [
        GuardStage::Authenticate,
        GuardStage::RateLimit,
        GuardStage::ValidateShape,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardStage::Authenticate => "authenticate",
            GuardStage::RateLimit => "rate_limit",
            GuardStage::ValidateShape => "validate_shape",
        }
    }
}

#[derive(Debug)]
pub enum StageOutcome {
    Continue,
    Reject(GuardRejection),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardRejection {
    #[error("authentication failed: {0}")]
    Unauthenticated(AuthError),

    #[error("rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("no route matches {method} {path}")]
    UnknownRoute { method: HttpMethod, path: String },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("invalid request shape: {0}")]
    InvalidShape(String),
}

impl GuardRejection {
    pub fn stage(&self) -> GuardStage {
        match self {
            GuardRejection::Unauthenticated(_) => GuardStage::Authenticate,
            GuardRejection::RateLimited { .. } => GuardStage::RateLimit,
            GuardRejection::UnknownRoute { .. }
            | GuardRejection::PayloadTooLarge { .. }
            | GuardRejection::InvalidShape(_) => GuardStage::ValidateShape,
        }
    }
}

/// Shape rule for one route. `path` may contain `{param}` segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteShape {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Require a JSON object body
    #[serde(default)]
    pub require_json: bool,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Per-route rate limit; falls back to the global default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl RouteShape {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            max_body_bytes: default_max_body_bytes(),
            require_json: false,
            required_fields: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn json(mut self, required_fields: &[&str]) -> Self {
        self.require_json = true;
        self.required_fields = required_fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn matches(&self, method: HttpMethod, path: &str) -> bool {
        if self.method != method {
            return false;
        }
        let pattern: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let actual: Vec<&str> = path.trim_matches('/').split('/').collect();
        pattern.len() == actual.len()
            && pattern.iter().zip(actual.iter()).all(|(p, a)| {
                (p.starts_with('{') && p.ends_with('}') && !a.is_empty()) || p == a
            })
    }

    /// Check body size, content type and required fields.
    pub fn validate(&self, request: &InboundRequest) -> Result<(), GuardRejection> {
        if request.body.len() > self.max_body_bytes {
            return Err(GuardRejection::PayloadTooLarge { limit: self.max_body_bytes });
        }
        if !self.require_json {
            return Ok(());
        }
        let is_json = request
            .header("content-type")
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return Err(GuardRejection::InvalidShape("expected application/json body".to_string()));
        }
        let body = request
            .json_body()
            .ok_or_else(|| GuardRejection::InvalidShape("body is not valid JSON".to_string()))?;
        let object = body
            .as_object()
            .ok_or_else(|| GuardRejection::InvalidShape("body must be a JSON object".to_string()))?;
        for field in &self.required_fields {
            if !object.contains_key(field) {
                return Err(GuardRejection::InvalidShape(format!("missing field '{}'", field)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_pattern_matching() {
        let route = RouteShape::new(HttpMethod::Post, "/v1/providers/{provider}/calls");
        assert!(route.matches(HttpMethod::Post, "/v1/providers/bank-api/calls"));
        assert!(!route.matches(HttpMethod::Get, "/v1/providers/bank-api/calls"));
        assert!(!route.matches(HttpMethod::Post, "/v1/providers/calls"));
    }

    #[test]
    fn test_shape_requires_fields() {
        let route = RouteShape::new(HttpMethod::Post, "/v1/accounts").json(&["name", "currency"]);
        let ok = InboundRequest::new(HttpMethod::Post, "/v1/accounts")
            .with_json(&json!({"name": "Savings", "currency": "EUR"}));
        assert!(route.validate(&ok).is_ok());

        let missing = InboundRequest::new(HttpMethod::Post, "/v1/accounts").with_json(&json!({"name": "Savings"}));
        assert!(matches!(route.validate(&missing), Err(GuardRejection::InvalidShape(_))));
    }

    #[test]
    fn test_session_token_from_cookie() {
        let req = InboundRequest::new(HttpMethod::Get, "/v1/accounts")
            .with_header("Cookie", "theme=dark; bastion_session=abc.def.ghi");
        assert_eq!(req.session_token("bastion_session").as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_claimed_tenant_from_body() {
        let req = InboundRequest::new(HttpMethod::Post, "/v1/accounts")
            .with_json(&json!({"tenant_id": "someone-else"}));
        assert_eq!(req.claimed_tenant().as_deref(), Some("someone-else"));
    }
}
