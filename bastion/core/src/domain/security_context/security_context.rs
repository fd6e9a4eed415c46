// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::capability::Capability;
use crate::domain::tenant::{SessionId, TenantId};

/// Authentication failures raised while turning a session proof into a context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Proof missing, malformed, wrongly signed, or contradicted by a client claim.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Proof verified but `now > expires_at`.
    #[error("session proof expired at {expires_at}")]
    Expired { expires_at: DateTime<Utc> },

    /// Context is valid but lacks the capability for the requested action.
    #[error("capability '{capability}' not granted")]
    Forbidden { capability: String },
}

/// Payload of a session proof after its signature has been verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub subject: String,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub capabilities: Vec<Capability>,
}

/// The opaque bearer credential presented by a request, plus any tenant id
/// the client *claims* (header or body). The claim is only ever compared
/// against the verified tenant, never used.
#[derive(Debug, Clone, Default)]
pub struct SessionProof {
    pub token: Option<String>,
    pub claimed_tenant: Option<String>,
}

impl SessionProof {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            claimed_tenant: None,
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    pub fn with_claimed_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.claimed_tenant = Some(tenant.into());
        self
    }
}

/// Verifies the cryptographic integrity of a session proof.
///
/// Implementations check the signature, issuer and audience only. Expiry is
/// evaluated by the context manager against its own clock so that the
/// `Expired` outcome is distinguishable from `Unauthorized`.
pub trait SessionProofVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<SessionClaims, AuthError>;
}

/// Authenticated, tenant-scoped context for exactly one request.
///
/// Built only by [`crate::application::context_manager::SecurityContextManager`].
/// Not `Clone`, not `Default`, not serializable: it lives and dies with the
/// request's execution scope and is passed by reference to every operation.
#[derive(Debug)]
pub struct SecurityContext {
    tenant_id: TenantId,
    session_id: SessionId,
    subject: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    capabilities: Vec<Capability>,
}

impl SecurityContext {
    pub(crate) fn from_claims(claims: SessionClaims) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            session_id: claims.session_id,
            subject: claims.subject,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
            capabilities: claims.capabilities,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn permits(&self, action: &str) -> bool {
        self.capabilities.iter().any(|c| c.matches(action))
    }

    /// Require a capability; no capability matched means deny.
    pub fn require(&self, action: &str) -> Result<(), AuthError> {
        if self.permits(action) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                capability: action.to_string(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn context_for(tenant_id: TenantId, caps: &[&str]) -> SecurityContext {
        let now = Utc::now();
        SecurityContext::from_claims(SessionClaims {
            subject: "user-1".to_string(),
            tenant_id,
            session_id: SessionId::new(),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(15),
            capabilities: caps.iter().map(|c| Capability::new(*c)).collect(),
        })
    }

    #[test]
    fn test_require_allows_matching_capability() {
        let ctx = context_for(TenantId::new(), &["ledger.*"]);
        assert!(ctx.require("ledger.read").is_ok());
    }

    #[test]
    fn test_require_denies_by_default() {
        let ctx = context_for(TenantId::new(), &["ledger.read"]);
        assert!(matches!(
            ctx.require("providers.bank-api"),
            Err(AuthError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let ctx = context_for(TenantId::new(), &[]);
        assert!(!ctx.is_expired_at(ctx.expires_at()));
        assert!(ctx.is_expired_at(ctx.expires_at() + chrono::Duration::seconds(1)));
    }
}
