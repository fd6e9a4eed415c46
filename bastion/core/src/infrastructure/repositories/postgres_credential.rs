// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Credential Repository
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Stores encrypted provider credentials in `provider_credentials`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::credential::{CredentialRecord, EncryptedSecret, ProviderId, RecordRevision, RotationState};
use crate::domain::repository::{CredentialRepository, RepositoryError};

pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str =
    "provider, encrypted_secret, pending_secret, version, rotation_state, created_at, rotated_at, expires_at";

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn find(&self, provider: &ProviderId) -> Result<Option<CredentialRecord>, RepositoryError> {
        let sql = format!("SELECT {} FROM provider_credentials WHERE provider = $1", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_credential_row).transpose()
    }

    async fn revision(&self, provider: &ProviderId) -> Result<Option<RecordRevision>, RepositoryError> {
        let row = sqlx::query("SELECT version, rotation_state FROM provider_credentials WHERE provider = $1")
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<RecordRevision, RepositoryError> {
            let version: i32 = row.try_get("version")?;
            let state: String = row.try_get("rotation_state")?;
            Ok(RecordRevision {
                version: parse_version(version)?,
                rotation_state: state.parse::<RotationState>().map_err(RepositoryError::Serialization)?,
            })
        })
        .transpose()
    }

    async fn insert(&self, record: &CredentialRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO provider_credentials (
                provider, encrypted_secret, pending_secret, version,
                rotation_state, created_at, rotated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.provider.as_str())
        .bind(record.encrypted_secret.encode())
        .bind(record.pending_secret.as_ref().map(EncryptedSecret::encode))
        .bind(record.version as i32)
        .bind(record.rotation_state.as_str())
        .bind(record.created_at)
        .bind(record.rotated_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_if(
        &self,
        expected: RecordRevision,
        record: &CredentialRecord,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE provider_credentials SET
                encrypted_secret = $3,
                pending_secret = $4,
                version = $5,
                rotation_state = $6,
                rotated_at = $7,
                expires_at = $8
            WHERE provider = $1 AND version = $2 AND rotation_state = $9
            "#,
        )
        .bind(record.provider.as_str())
        .bind(expected.version as i32)
        .bind(record.encrypted_secret.encode())
        .bind(record.pending_secret.as_ref().map(EncryptedSecret::encode))
        .bind(record.version as i32)
        .bind(record.rotation_state.as_str())
        .bind(record.rotated_at)
        .bind(record.expires_at)
        .bind(expected.rotation_state.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, RepositoryError> {
        let sql = format!("SELECT {} FROM provider_credentials ORDER BY provider", COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(parse_credential_row).collect()
    }
}

fn parse_version(version: i32) -> Result<u32, RepositoryError> {
    u32::try_from(version).map_err(|_| RepositoryError::Serialization(format!("invalid version {}", version)))
}

fn parse_credential_row(row: PgRow) -> Result<CredentialRecord, RepositoryError> {
    let provider: String = row.try_get("provider")?;
    let encrypted: String = row.try_get("encrypted_secret")?;
    let pending: Option<String> = row.try_get("pending_secret")?;
    let version: i32 = row.try_get("version")?;
    let state: String = row.try_get("rotation_state")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let decode = |s: &str| {
        EncryptedSecret::decode(s).map_err(|e| RepositoryError::Serialization(e.to_string()))
    };

    Ok(CredentialRecord {
        provider: ProviderId::new(provider).map_err(|e| RepositoryError::Serialization(e.to_string()))?,
        encrypted_secret: decode(&encrypted)?,
        pending_secret: pending.as_deref().map(decode).transpose()?,
        version: parse_version(version)?,
        created_at,
        rotated_at: row.try_get("rotated_at")?,
        expires_at: row.try_get("expires_at")?,
        rotation_state: state
            .parse::<RotationState>()
            .map_err(RepositoryError::Serialization)?,
    })
}
