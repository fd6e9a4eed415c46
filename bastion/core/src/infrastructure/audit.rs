// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Security Audit Logger
//!
//! Records security incidents as structured `error!` events carrying
//! `security_incident = true`, increments
//! `bastion_security_incidents_total{kind}` and keeps a short in-memory tail
//! for diagnostics.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::error;

use crate::domain::credential::ProviderId;
use crate::domain::tenant::{SessionId, TenantId};

const RECENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SecurityIncident {
    ScopeApplicationFailed {
        tenant_id: TenantId,
        session_id: SessionId,
        detail: String,
    },
    TenantClaimMismatch {
        session_id: SessionId,
        verified: TenantId,
        claimed: String,
    },
    DecryptionFailed {
        provider: ProviderId,
    },
    SignatureRejected {
        provider: ProviderId,
        status: u16,
        credential_version: u32,
        tenant_id: TenantId,
        session_id: SessionId,
    },
}

impl SecurityIncident {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityIncident::ScopeApplicationFailed { .. } => "scope_application_failed",
            SecurityIncident::TenantClaimMismatch { .. } => "tenant_claim_mismatch",
            SecurityIncident::DecryptionFailed { .. } => "decryption_failed",
            SecurityIncident::SignatureRejected { .. } => "signature_rejected",
        }
    }
}

pub struct SecurityAuditLogger {
    recent: Mutex<VecDeque<SecurityIncident>>,
}

impl SecurityAuditLogger {
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
        }
    }

    pub fn record(&self, incident: SecurityIncident) {
        let kind = incident.kind();
        match &incident {
            SecurityIncident::ScopeApplicationFailed { tenant_id, session_id, detail } => {
                error!(
                    security_incident = true,
                    kind,
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    "Tenant scope could not be applied; transaction aborted: {}",
                    detail
                );
            }
            SecurityIncident::TenantClaimMismatch { session_id, verified, claimed } => {
                error!(
                    security_incident = true,
                    kind,
                    session_id = %session_id,
                    verified_tenant = %verified,
                    claimed_tenant = %claimed,
                    "Client-supplied tenant claim contradicts session proof"
                );
            }
            SecurityIncident::DecryptionFailed { provider } => {
                error!(
                    security_incident = true,
                    kind,
                    provider = %provider,
                    "Credential failed to decrypt; provider quarantined"
                );
            }
            SecurityIncident::SignatureRejected {
                provider,
                status,
                credential_version,
                tenant_id,
                session_id,
            } => {
                error!(
                    security_incident = true,
                    kind,
                    provider = %provider,
                    status,
                    credential_version,
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    "Partner rejected request signature after credential refresh"
                );
            }
        }
        metrics::counter!("bastion_security_incidents_total", "kind" => kind).increment(1);

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(incident);
    }

    /// Most recent incidents, oldest first.
    pub fn recent(&self) -> Vec<SecurityIncident> {
        self.recent.lock().iter().cloned().collect()
    }
}

impl Default for SecurityAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
