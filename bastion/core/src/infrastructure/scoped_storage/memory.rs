// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory scoped storage
//!
//! A deterministic stand-in for PostgreSQL that keeps the same contract:
//! transaction-local scope, statements refused until the scope is applied,
//! writes invisible until commit, and pooled connection slots reset on
//! release. Used by tests and `bastion serve` without a database.
//!
//! Release mirrors the pool's `after_release` hook in `db.rs`. A slot whose
//! reset fails is discarded. [`ScopeReset::Skip`] models a pool without the
//! hook, so the tenant value survives on the idle slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::ledger::{Account, AccountId, LedgerEntry, NewAccount, NewEntry};
use crate::domain::scoping::{
    LedgerStatements, StorageError, TenantConnection, TransactionSource, TxControl,
};
use crate::domain::tenant::TenantId;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
}

enum Mutation {
    Account(Account),
    Entry(LedgerEntry),
}

/// What happens to a pooled slot's scope value on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeReset {
    /// Clear the value and return the slot to the pool.
    #[default]
    Reset,
    /// The reset statement fails; the slot is discarded.
    Fail,
    /// No reset runs; the slot goes back still carrying the value.
    Skip,
}

struct StoreInner {
    tables: Mutex<Tables>,
    /// Idle pooled sessions; `Some` means a scope survived release
    idle_slots: Mutex<Vec<Option<TenantId>>>,
    reset: Mutex<ScopeReset>,
    fail_scope: AtomicBool,
    statements: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Clone)]
pub struct InMemoryScopedStore {
    inner: Arc<StoreInner>,
}

impl InMemoryScopedStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: Mutex::new(Tables::default()),
                idle_slots: Mutex::new(Vec::new()),
                reset: Mutex::new(ScopeReset::Reset),
                fail_scope: AtomicBool::new(false),
                statements: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Make every subsequent `apply_scope` fail, simulating a dropped
    /// connection or a rejected `set_config`.
    pub fn fail_scope_application(&self, fail: bool) {
        self.inner.fail_scope.store(fail, Ordering::SeqCst);
    }

    pub fn set_scope_reset(&self, reset: ScopeReset) {
        *self.inner.reset.lock() = reset;
    }

    /// Slots dropped from the pool because their reset failed.
    pub fn discarded_sessions(&self) -> u64 {
        self.inner.discarded.load(Ordering::SeqCst)
    }

    /// Statements that reached the tables, across all connections.
    pub fn statements_executed(&self) -> u64 {
        self.inner.statements.load(Ordering::SeqCst)
    }

    /// Idle pooled sessions still carrying a tenant scope. Zero unless
    /// [`ScopeReset::Skip`] is set.
    pub fn idle_scoped_sessions(&self) -> usize {
        self.inner.idle_slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn idle_sessions(&self) -> usize {
        self.inner.idle_slots.lock().len()
    }

    /// Committed rows of every tenant. Bypasses scoping; tests only.
    pub fn all_accounts(&self) -> Vec<Account> {
        self.inner.tables.lock().accounts.values().cloned().collect()
    }
}

impl Default for InMemoryScopedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSource for InMemoryScopedStore {
    type Connection = InMemoryConnection;

    async fn begin(&self) -> Result<Self::Connection, StorageError> {
        let residual = self.inner.idle_slots.lock().pop().flatten();
        Ok(InMemoryConnection {
            store: self.inner.clone(),
            scope: residual,
            scope_applied: false,
            staged: Vec::new(),
            finished: false,
        })
    }
}

pub struct InMemoryConnection {
    store: Arc<StoreInner>,
    /// Session-level scope value
    scope: Option<TenantId>,
    /// Set by `apply_scope` inside this transaction
    scope_applied: bool,
    staged: Vec<Mutation>,
    finished: bool,
}

impl InMemoryConnection {
    fn tenant(&self) -> Result<TenantId, StorageError> {
        match (self.scope_applied, self.scope) {
            (true, Some(tenant)) => Ok(tenant),
            _ => Err(StorageError::ScopeNotApplied),
        }
    }

    fn count_statement(&self) {
        self.store.statements.fetch_add(1, Ordering::SeqCst);
    }

    fn visible_accounts(&self, tables: &Tables, tenant: TenantId) -> Vec<Account> {
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant)
            .cloned()
            .chain(self.staged.iter().filter_map(|m| match m {
                Mutation::Account(a) if a.tenant_id == tenant => Some(a.clone()),
                _ => None,
            }))
            .collect();
        let entries = self.visible_entries(tables, tenant);
        for account in &mut accounts {
            account.balance_minor = entries
                .iter()
                .filter(|e| e.account_id == account.id)
                .map(|e| e.amount_minor)
                .sum();
        }
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    fn visible_entries(&self, tables: &Tables, tenant: TenantId) -> Vec<LedgerEntry> {
        tables
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant)
            .cloned()
            .chain(self.staged.iter().filter_map(|m| match m {
                Mutation::Entry(e) if e.tenant_id == tenant => Some(e.clone()),
                _ => None,
            }))
            .collect()
    }

    fn release(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.staged.clear();
        // transaction-local scope ends with the transaction
        self.scope_applied = false;
        let residual = self.scope.take();
        let reset = *self.store.reset.lock();
        match reset {
            ScopeReset::Reset => self.store.idle_slots.lock().push(None),
            ScopeReset::Skip => self.store.idle_slots.lock().push(residual),
            ScopeReset::Fail => {
                self.store.discarded.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        // dropped mid-transaction: implicit rollback
        self.release();
    }
}

#[async_trait]
impl TenantConnection for InMemoryConnection {
    async fn apply_scope(
        &mut self,
        _control: &TxControl,
        _parameter: &str,
        tenant_id: &TenantId,
    ) -> Result<(), StorageError> {
        if self.scope_applied {
            return Err(StorageError::ScopeAlreadyApplied);
        }
        if self.store.fail_scope.load(Ordering::SeqCst) {
            return Err(StorageError::Io("connection reset while applying scope".to_string()));
        }
        self.scope = Some(*tenant_id);
        self.scope_applied = true;
        Ok(())
    }

    async fn commit(mut self, _control: &TxControl) -> Result<(), StorageError> {
        {
            let mut tables = self.store.tables.lock();
            for mutation in self.staged.drain(..) {
                match mutation {
                    Mutation::Account(a) => {
                        tables.accounts.insert(a.id, a);
                    }
                    Mutation::Entry(e) => tables.entries.push(e),
                }
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self, _control: &TxControl) -> Result<(), StorageError> {
        self.release();
        Ok(())
    }
}

#[async_trait]
impl LedgerStatements for InMemoryConnection {
    async fn list_accounts(&mut self) -> Result<Vec<Account>, StorageError> {
        let tenant = self.tenant()?;
        self.count_statement();
        let tables = self.store.tables.lock();
        Ok(self.visible_accounts(&tables, tenant))
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let tenant = self.tenant()?;
        self.count_statement();
        let tables = self.store.tables.lock();
        Ok(self.visible_accounts(&tables, tenant).into_iter().find(|a| a.id == id))
    }

    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StorageError> {
        let tenant = self.tenant()?;
        self.count_statement();
        let duplicate = {
            let tables = self.store.tables.lock();
            self.visible_accounts(&tables, tenant)
                .iter()
                .any(|a| a.name == account.name)
        };
        if duplicate {
            return Err(StorageError::ConstraintViolation(format!(
                "account '{}' already exists",
                account.name
            )));
        }
        let row = Account {
            id: AccountId::new(),
            tenant_id: tenant,
            name: account.name.clone(),
            currency: account.currency.clone(),
            balance_minor: 0,
            created_at: Utc::now(),
        };
        self.staged.push(Mutation::Account(row.clone()));
        Ok(row)
    }

    async fn insert_entry(&mut self, entry: &NewEntry) -> Result<LedgerEntry, StorageError> {
        let tenant = self.tenant()?;
        self.count_statement();
        let account_visible = {
            let tables = self.store.tables.lock();
            self.visible_accounts(&tables, tenant)
                .iter()
                .any(|a| a.id == entry.account_id)
        };
        // same outcome as the composite foreign key in PostgreSQL
        if !account_visible {
            return Err(StorageError::ConstraintViolation(format!(
                "account {} does not exist",
                entry.account_id
            )));
        }
        let row = LedgerEntry {
            id: Uuid::new_v4(),
            account_id: entry.account_id,
            tenant_id: tenant,
            amount_minor: entry.amount_minor,
            memo: entry.memo.clone(),
            created_at: Utc::now(),
        };
        self.staged.push(Mutation::Entry(row.clone()));
        Ok(row)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StorageError> {
        let tenant = self.tenant()?;
        self.count_statement();
        let tables = self.store.tables.lock();
        Ok(self
            .visible_entries(&tables, tenant)
            .into_iter()
            .filter(|e| e.account_id == account_id)
            .collect())
    }
}
