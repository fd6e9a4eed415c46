// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for aggregates that live outside a tenant scope.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `CredentialRepository` | `CredentialRecord` | `InMemoryCredentialRepository`, `PostgresCredentialRepository` |
//!
//! Tenant-owned rows (accounts, entries) are not reached through repositories
//! at all: they are only reachable through a
//! [`crate::domain::scoping::ScopedTransaction`].

use async_trait::async_trait;

use crate::domain::credential::{CredentialRecord, ProviderId, RecordRevision};

/// Durable store of encrypted provider credentials.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Find the record for a provider
    async fn find(&self, provider: &ProviderId) -> Result<Option<CredentialRecord>, RepositoryError>;

    /// Current `(version, rotation_state)` of a provider's record, without
    /// reading the secret columns
    async fn revision(&self, provider: &ProviderId) -> Result<Option<RecordRevision>, RepositoryError>;

    /// Insert a new record; fails with `Conflict` if one exists
    async fn insert(&self, record: &CredentialRecord) -> Result<(), RepositoryError>;

    /// Replace the stored record only if it still matches `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first. This is what
    /// makes rotation atomic across processes sharing one database.
    async fn update_if(
        &self,
        expected: RecordRevision,
        record: &CredentialRecord,
    ) -> Result<bool, RepositoryError>;

    /// List all records
    async fn list(&self) -> Result<Vec<CredentialRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
