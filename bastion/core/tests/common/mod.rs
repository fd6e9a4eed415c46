// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration suites. Contexts are only ever built
//! the production way: mint a session JWT, verify it, build a context.

#![allow(dead_code)]

use std::sync::Arc;

use bastion_core::application::SecurityContextManager;
use bastion_core::domain::security_context::{Capability, SecurityContext, SessionClaims, SessionProof};
use bastion_core::domain::tenant::{SessionId, TenantId};
use bastion_core::infrastructure::session_activity::InMemorySessionActivityRepository;
use bastion_core::infrastructure::{JwtSessionIssuer, JwtSessionVerifier, SecurityAuditLogger};
use chrono::{DateTime, Duration, Utc};

pub const SESSION_SECRET: &[u8] = b"integration-session-secret-32-bytes!!";
pub const ISSUER: &str = "bastion-auth";
pub const AUDIENCE: &str = "bastion-api";

pub fn context_manager(audit: Arc<SecurityAuditLogger>) -> SecurityContextManager {
    let verifier = JwtSessionVerifier::hs256(SESSION_SECRET, ISSUER, &[AUDIENCE]).unwrap();
    SecurityContextManager::new(
        Arc::new(verifier),
        Arc::new(InMemorySessionActivityRepository::new()),
        audit,
    )
}

pub fn session_token(tenant_id: TenantId, caps: &[&str], expires_at: DateTime<Utc>) -> String {
    JwtSessionIssuer::hs256(SESSION_SECRET, ISSUER, AUDIENCE)
        .issue(&SessionClaims {
            subject: "integration-user".to_string(),
            tenant_id,
            session_id: SessionId::new(),
            issued_at: expires_at - Duration::minutes(15),
            expires_at,
            capabilities: caps.iter().map(|c| Capability::new(*c)).collect(),
        })
        .unwrap()
}

/// A live context for `tenant_id` with the given capabilities.
pub async fn context(tenant_id: TenantId, caps: &[&str]) -> SecurityContext {
    let manager = context_manager(Arc::new(SecurityAuditLogger::new()));
    let token = session_token(tenant_id, caps, Utc::now() + Duration::minutes(10));
    manager.build(&SessionProof::bearer(token)).await.unwrap()
}
