// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request Security Context Manager
//!
//! Turns the session proof of one inbound request into a [`SecurityContext`].
//! The tenant always comes from the verified proof; a client-supplied tenant
//! claim is only compared against it, and a mismatch rejects the request.
//!
//! Building a context records a last-seen timestamp for the session in the
//! [`SessionActivityRepository`]. Tenant storage is never touched here.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::domain::security_context::{
    AuthError, SecurityContext, SessionActivityRepository, SessionProof, SessionProofVerifier,
};
use crate::domain::tenant::TenantId;
use crate::infrastructure::audit::{SecurityAuditLogger, SecurityIncident};

pub struct SecurityContextManager {
    verifier: Arc<dyn SessionProofVerifier>,
    activity: Arc<dyn SessionActivityRepository>,
    audit: Arc<SecurityAuditLogger>,
    leeway: Duration,
}

impl SecurityContextManager {
    pub fn new(
        verifier: Arc<dyn SessionProofVerifier>,
        activity: Arc<dyn SessionActivityRepository>,
        audit: Arc<SecurityAuditLogger>,
    ) -> Self {
        Self {
            verifier,
            activity,
            audit,
            leeway: Duration::zero(),
        }
    }

    pub fn with_leeway_secs(mut self, secs: u64) -> Self {
        self.leeway = Duration::seconds(secs as i64);
        self
    }

    pub async fn build(&self, proof: &SessionProof) -> Result<SecurityContext, AuthError> {
        self.build_at(proof, Utc::now()).await
    }

    /// Build against an explicit clock.
    pub async fn build_at(&self, proof: &SessionProof, now: DateTime<Utc>) -> Result<SecurityContext, AuthError> {
        let result = self.verify(proof, now);
        let outcome = match &result {
            Ok(_) => "ok",
            Err(AuthError::Expired { .. }) => "expired",
            Err(_) => "unauthorized",
        };
        metrics::counter!("bastion_context_builds_total", "outcome" => outcome).increment(1);

        let context = result?;
        if let Err(e) = self
            .activity
            .record_seen(context.session_id(), context.tenant_id(), now)
            .await
        {
            // activity is an audit trail, not an authorization input
            warn!("Failed to record session activity for {}: {}", context.session_id(), e);
        }
        debug!(
            tenant_id = %context.tenant_id(),
            session_id = %context.session_id(),
            "Security context established"
        );
        Ok(context)
    }

    fn verify(&self, proof: &SessionProof, now: DateTime<Utc>) -> Result<SecurityContext, AuthError> {
        let token = proof
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Unauthorized("missing session proof".to_string()))?;

        let claims = self.verifier.verify(token)?;

        if now > claims.expires_at + self.leeway {
            return Err(AuthError::Expired {
                expires_at: claims.expires_at,
            });
        }
        if claims.issued_at > now + self.leeway {
            return Err(AuthError::Unauthorized("session proof issued in the future".to_string()));
        }

        if let Some(claimed) = proof.claimed_tenant.as_deref() {
            let matches = TenantId::from_string(claimed.trim())
                .map(|t| t == claims.tenant_id)
                .unwrap_or(false);
            if !matches {
                self.audit.record(SecurityIncident::TenantClaimMismatch {
                    session_id: claims.session_id,
                    verified: claims.tenant_id,
                    claimed: claimed.to_string(),
                });
                return Err(AuthError::Unauthorized(
                    "tenant claim does not match session".to_string(),
                ));
            }
        }

        Ok(SecurityContext::from_claims(claims))
    }
}
