// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ledger
//!
//! Tenant-owned accounts and entries. These are the rows the scoped executor
//! protects; every read and write goes through a
//! [`crate::domain::scoping::ScopedTransaction`].
//!
//! Write models (`NewAccount`, `NewEntry`) carry no tenant id. The owning
//! tenant is taken from the transaction's scoping parameter by the storage
//! backend, so a caller cannot write a row into another tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub name: String,
    /// ISO 4217 code, upper case
    pub currency: String,
    /// Sum of all entries, in minor units
    pub balance_minor: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub tenant_id: TenantId,
    pub amount_minor: i64,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount_minor: i64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl NewAccount {
    /// Validate the write model before it reaches storage.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty".to_string());
        }
        if self.name.len() > 120 {
            return Err("account name exceeds 120 characters".to_string());
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("invalid currency code '{}'", self.currency));
        }
        Ok(())
    }
}
