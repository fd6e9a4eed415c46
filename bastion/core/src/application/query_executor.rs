// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant-Scoped Query Executor
//!
//! Runs a unit of work inside one transaction whose scoping parameter is set
//! to the context's tenant before any caller statement executes.
//!
//! ```text
//! begin ─► apply_scope ──ok──► unit_of_work ──ok──► commit
//!              │                    │
//!              └─err─► rollback     └─err/deadline─► rollback
//!                 ScopeApplicationFailed
//! ```
//!
//! The executor does not decide authorization policy; callers check
//! capabilities on the context before calling it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::domain::scoping::{
    DataError, ScopedTransaction, TenantConnection, TransactionSource, TxControl,
    DEFAULT_SCOPE_PARAMETER,
};
use crate::domain::security_context::SecurityContext;
use crate::infrastructure::audit::{SecurityAuditLogger, SecurityIncident};

pub struct TenantScopedExecutor<S: TransactionSource> {
    source: S,
    scope_parameter: String,
    deadline: Option<Duration>,
    audit: Arc<SecurityAuditLogger>,
}

impl<S: TransactionSource> TenantScopedExecutor<S> {
    pub fn new(source: S, audit: Arc<SecurityAuditLogger>) -> Self {
        Self {
            source,
            scope_parameter: DEFAULT_SCOPE_PARAMETER.to_string(),
            deadline: None,
            audit,
        }
    }

    pub fn with_scope_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.scope_parameter = parameter.into();
        self
    }

    /// Abort and roll back units of work that run longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn execute<T, F>(&self, context: &SecurityContext, unit_of_work: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut ScopedTransaction<S::Connection>) -> BoxFuture<'t, Result<T, DataError>> + Send,
    {
        self.execute_at(context, Utc::now(), unit_of_work).await
    }

    pub async fn execute_at<T, F>(
        &self,
        context: &SecurityContext,
        now: DateTime<Utc>,
        unit_of_work: F,
    ) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut ScopedTransaction<S::Connection>) -> BoxFuture<'t, Result<T, DataError>> + Send,
    {
        let result = self.run(context, now, unit_of_work).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(DataError::ScopeApplicationFailed) => "scope_failed",
            Err(DataError::DeadlineExceeded) => "deadline_exceeded",
            Err(DataError::ContextExpired) => "context_expired",
            Err(_) => "rolled_back",
        };
        metrics::counter!("bastion_scoped_transactions_total", "outcome" => outcome).increment(1);
        result
    }

    async fn run<T, F>(&self, context: &SecurityContext, now: DateTime<Utc>, unit_of_work: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut ScopedTransaction<S::Connection>) -> BoxFuture<'t, Result<T, DataError>> + Send,
    {
        if context.is_expired_at(now) {
            return Err(DataError::ContextExpired);
        }

        let tenant_id = context.tenant_id();
        let session_id = context.session_id();
        let control = TxControl::new();
        let mut conn = self.source.begin().await?;

        if let Err(e) = conn.apply_scope(&control, &self.scope_parameter, &tenant_id).await {
            self.audit.record(SecurityIncident::ScopeApplicationFailed {
                tenant_id,
                session_id,
                detail: e.to_string(),
            });
            if let Err(rb) = conn.rollback(&control).await {
                warn!("Rollback after scope failure also failed: {}", rb);
            }
            return Err(DataError::ScopeApplicationFailed);
        }

        let mut tx = ScopedTransaction::new(conn, tenant_id, session_id);
        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, unit_of_work(&mut tx))
                .await
                .unwrap_or(Err(DataError::DeadlineExceeded)),
            None => unit_of_work(&mut tx).await,
        };
        let statements = tx.statements_executed();
        let conn = tx.into_connection();

        match result {
            Ok(value) => {
                conn.commit(&control).await?;
                debug!(tenant_id = %tenant_id, statements, "Scoped transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = conn.rollback(&control).await {
                    warn!("Rollback failed for tenant {}: {}", tenant_id, rb);
                }
                debug!(tenant_id = %tenant_id, statements, "Scoped transaction rolled back: {}", e);
                Err(e)
            }
        }
    }
}
