// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL scoped storage
//!
//! The tenant scope is a transaction-local custom parameter set with
//! `set_config(name, value, true)`. Every ledger statement filters on
//! `current_setting(name)::uuid`, and the shipped migration adds row-level
//! security policies on the same parameter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::ledger::{Account, AccountId, LedgerEntry, NewAccount, NewEntry};
use crate::domain::scoping::{
    LedgerStatements, StorageError, TenantConnection, TransactionSource, TxControl,
};
use crate::domain::tenant::TenantId;

#[derive(Clone)]
pub struct PgTransactionSource {
    pool: PgPool,
}

impl PgTransactionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionSource for PgTransactionSource {
    type Connection = PgTenantConnection;

    async fn begin(&self) -> Result<Self::Connection, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(PgTenantConnection { tx, parameter: None })
    }
}

pub struct PgTenantConnection {
    tx: Transaction<'static, Postgres>,
    /// Scope parameter name, set once `apply_scope` succeeded
    parameter: Option<String>,
}

impl PgTenantConnection {
    fn parameter(&self) -> Result<&str, StorageError> {
        self.parameter.as_deref().ok_or(StorageError::ScopeNotApplied)
    }
}

#[async_trait]
impl TenantConnection for PgTenantConnection {
    async fn apply_scope(
        &mut self,
        _control: &TxControl,
        parameter: &str,
        tenant_id: &TenantId,
    ) -> Result<(), StorageError> {
        if self.parameter.is_some() {
            return Err(StorageError::ScopeAlreadyApplied);
        }
        let applied: Option<String> = sqlx::query_scalar("SELECT set_config($1, $2, true)")
            .bind(parameter)
            .bind(tenant_id.to_string())
            .fetch_one(&mut *self.tx)
            .await?;
        // read back what the server holds for this transaction
        if applied.as_deref() != Some(tenant_id.to_string().as_str()) {
            return Err(StorageError::Backend(format!(
                "{} did not take the expected value",
                parameter
            )));
        }
        self.parameter = Some(parameter.to_string());
        Ok(())
    }

    async fn commit(self, _control: &TxControl) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self, _control: &TxControl) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = r#"
    a.id, a.tenant_id, a.name, a.currency, a.created_at,
    COALESCE((
        SELECT SUM(e.amount_minor) FROM ledger_entries e
        WHERE e.account_id = a.id AND e.tenant_id = a.tenant_id
    ), 0)::BIGINT AS balance_minor
"#;

fn parse_account_row(row: PgRow) -> Result<Account, StorageError> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(Account {
        id: AccountId(row.try_get::<Uuid, _>("id")?),
        tenant_id: TenantId(row.try_get::<Uuid, _>("tenant_id")?),
        name: row.try_get("name")?,
        currency: row.try_get("currency")?,
        balance_minor: row.try_get("balance_minor")?,
        created_at,
    })
}

fn parse_entry_row(row: PgRow) -> Result<LedgerEntry, StorageError> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: AccountId(row.try_get::<Uuid, _>("account_id")?),
        tenant_id: TenantId(row.try_get::<Uuid, _>("tenant_id")?),
        amount_minor: row.try_get("amount_minor")?,
        memo: row.try_get("memo")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LedgerStatements for PgTenantConnection {
    async fn list_accounts(&mut self) -> Result<Vec<Account>, StorageError> {
        let parameter = self.parameter()?.to_string();
        let sql = format!(
            "SELECT {} FROM accounts a WHERE a.tenant_id = current_setting($1)::uuid ORDER BY a.created_at",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parameter)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(parse_account_row).collect()
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let parameter = self.parameter()?.to_string();
        let sql = format!(
            "SELECT {} FROM accounts a WHERE a.tenant_id = current_setting($1)::uuid AND a.id = $2",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(parameter)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(parse_account_row).transpose()
    }

    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StorageError> {
        let parameter = self.parameter()?.to_string();
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (id, tenant_id, name, currency, created_at)
            VALUES ($2, current_setting($1)::uuid, $3, $4, now())
            RETURNING id, tenant_id, name, currency, created_at, 0::BIGINT AS balance_minor
            "#,
        )
        .bind(parameter)
        .bind(Uuid::new_v4())
        .bind(&account.name)
        .bind(&account.currency)
        .fetch_one(&mut *self.tx)
        .await?;
        parse_account_row(row)
    }

    async fn insert_entry(&mut self, entry: &NewEntry) -> Result<LedgerEntry, StorageError> {
        let parameter = self.parameter()?.to_string();
        // composite FK (account_id, tenant_id) rejects another tenant's account
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, account_id, tenant_id, amount_minor, memo, created_at)
            VALUES ($2, $3, current_setting($1)::uuid, $4, $5, now())
            RETURNING id, account_id, tenant_id, amount_minor, memo, created_at
            "#,
        )
        .bind(parameter)
        .bind(Uuid::new_v4())
        .bind(entry.account_id.0)
        .bind(entry.amount_minor)
        .bind(&entry.memo)
        .fetch_one(&mut *self.tx)
        .await?;
        parse_entry_row(row)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StorageError> {
        let parameter = self.parameter()?.to_string();
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, tenant_id, amount_minor, memo, created_at
            FROM ledger_entries
            WHERE tenant_id = current_setting($1)::uuid AND account_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(parameter)
        .bind(account_id.0)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(parse_entry_row).collect()
    }
}
