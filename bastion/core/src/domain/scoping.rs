// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tenant Scoping Contracts
//!
//! The single hand-off point between the query executor and the storage
//! layer. A storage backend provides a [`TransactionSource`] whose
//! connections accept a transaction-local scoping parameter
//! (`app.current_tenant_id` by default) and consult it for every statement.
//!
//! ## Invariants
//!
//! - A [`ScopedTransaction`] is tagged with exactly one `TenantId`, applied to
//!   the connection before any caller statement runs.
//! - Backends refuse tenant-data statements on a connection whose scope has
//!   not been applied (`StorageError::ScopeNotApplied`), so a missed scope
//!   fails closed at the storage level too.
//! - Connections are returned to their pool only after the scope is cleared
//!   (or are discarded).
//! - The scope is applied once per transaction. A second `apply_scope` on the
//!   same transaction fails with `StorageError::ScopeAlreadyApplied`.
//! - Scoping, commit and rollback need a [`TxControl`], which only this crate
//!   can mint. Units of work see the connection only through
//!   [`ScopedTransaction`].

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ledger::{Account, AccountId, LedgerEntry, NewAccount, NewEntry};
use crate::domain::tenant::{SessionId, TenantId};

/// Scoping parameter name consulted by the storage layer.
pub const DEFAULT_SCOPE_PARAMETER: &str = "app.current_tenant_id";

/// Backend-level failures. Never returned to callers of the executor; they are
/// mapped into [`DataError`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("tenant scope has not been applied to this connection")]
    ScopeNotApplied,

    #[error("tenant scope is already applied to this transaction")]
    ScopeAlreadyApplied,

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient I/O failure: {0}")]
    Io(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
            sqlx::Error::Io(e) => StorageError::Io(e.to_string()),
            sqlx::Error::PoolTimedOut => StorageError::Io("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => StorageError::Io("connection pool closed".to_string()),
            sqlx::Error::Tls(e) => StorageError::Io(format!("tls: {}", e)),
            sqlx::Error::Database(db) => {
                // SQLSTATE class 23 = integrity constraint violation
                if db.code().map(|c| c.starts_with("23")).unwrap_or(false) {
                    StorageError::ConstraintViolation(db.message().to_string())
                } else {
                    StorageError::Backend(db.message().to_string())
                }
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Errors surfaced by [`crate::application::query_executor::TenantScopedExecutor`].
#[derive(Debug, Error)]
pub enum DataError {
    /// The tenant scoping parameter could not be applied. Security incident:
    /// the transaction was aborted before any caller statement ran.
    #[error("tenant scope could not be applied; transaction aborted")]
    ScopeApplicationFailed,

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Retryable by the caller.
    #[error("transient I/O failure: {0}")]
    TransientIO(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The security context expired before the unit of work started.
    #[error("security context expired")]
    ContextExpired,

    /// The unit of work exceeded its deadline and was rolled back.
    #[error("unit of work exceeded its deadline and was rolled back")]
    DeadlineExceeded,

    /// The caller aborted its own unit of work.
    #[error("unit of work aborted: {0}")]
    Aborted(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl DataError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::TransientIO(_))
    }
}

impl From<StorageError> for DataError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ScopeNotApplied | StorageError::ScopeAlreadyApplied => {
                DataError::ScopeApplicationFailed
            }
            StorageError::ConstraintViolation(msg) => DataError::ConstraintViolation(msg),
            StorageError::NotFound(msg) => DataError::NotFound(msg),
            StorageError::Io(msg) => DataError::TransientIO(msg),
            StorageError::Backend(msg) => DataError::Storage(msg),
        }
    }
}

/// Permission to drive a connection's transaction lifecycle.
#[derive(Debug)]
pub struct TxControl(());

impl TxControl {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// A single database connection with an open transaction.
#[async_trait]
pub trait TenantConnection: Send {
    /// Set the transaction-local scoping parameter to `tenant_id`. Fails with
    /// [`StorageError::ScopeAlreadyApplied`] when called twice in one
    /// transaction.
    async fn apply_scope(
        &mut self,
        control: &TxControl,
        parameter: &str,
        tenant_id: &TenantId,
    ) -> Result<(), StorageError>;

    async fn commit(self, control: &TxControl) -> Result<(), StorageError>;

    async fn rollback(self, control: &TxControl) -> Result<(), StorageError>;
}

/// Opens transactions on pooled connections.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Connection: TenantConnection;

    async fn begin(&self) -> Result<Self::Connection, StorageError>;
}

/// Ledger statements a scoped connection can execute. Implementations must
/// constrain every statement to the tenant in the connection's scope.
#[async_trait]
pub trait LedgerStatements: TenantConnection {
    async fn list_accounts(&mut self) -> Result<Vec<Account>, StorageError>;
    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError>;
    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StorageError>;
    async fn insert_entry(&mut self, entry: &NewEntry) -> Result<LedgerEntry, StorageError>;
    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StorageError>;
}

/// Transaction handle tagged with exactly one tenant.
///
/// Only the executor constructs one, after the scope has been applied. The
/// handle is lent to the unit of work by `&mut` and never outlives it. The
/// underlying connection is not reachable through it.
pub struct ScopedTransaction<C> {
    conn: C,
    tenant_id: TenantId,
    session_id: SessionId,
    statements: u64,
}

impl<C: TenantConnection> ScopedTransaction<C> {
    pub(crate) fn new(conn: C, tenant_id: TenantId, session_id: SessionId) -> Self {
        Self {
            conn,
            tenant_id,
            session_id,
            statements: 0,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Session of the security context this transaction was opened for.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Number of statements issued through this handle, in submission order.
    pub fn statements_executed(&self) -> u64 {
        self.statements
    }

    pub(crate) fn into_connection(self) -> C {
        self.conn
    }
}

impl<C: LedgerStatements> ScopedTransaction<C> {
    pub async fn list_accounts(&mut self) -> Result<Vec<Account>, DataError> {
        self.statements += 1;
        Ok(self.conn.list_accounts().await?)
    }

    pub async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, DataError> {
        self.statements += 1;
        Ok(self.conn.find_account(id).await?)
    }

    pub async fn open_account(&mut self, account: &NewAccount) -> Result<Account, DataError> {
        account.validate().map_err(DataError::ConstraintViolation)?;
        self.statements += 1;
        Ok(self.conn.insert_account(account).await?)
    }

    pub async fn record_entry(&mut self, entry: &NewEntry) -> Result<LedgerEntry, DataError> {
        self.statements += 1;
        Ok(self.conn.insert_entry(entry).await?)
    }

    pub async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<LedgerEntry>, DataError> {
        self.statements += 1;
        Ok(self.conn.list_entries(account_id).await?)
    }
}
