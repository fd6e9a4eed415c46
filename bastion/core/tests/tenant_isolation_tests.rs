// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant isolation through the scoped executor, against the in-memory backend.
//!
//! - concurrent units of work for two tenants see disjoint rows
//! - a failed scope application runs no statement and is audited
//! - an expired session never opens a transaction
//! - pooled sessions are returned unscoped, and a slot that kept its scope
//!   is re-scoped before the next tenant's statements run

mod common;

use std::sync::Arc;

use bastion_core::application::TenantScopedExecutor;
use bastion_core::domain::ledger::{NewAccount, NewEntry};
use bastion_core::domain::scoping::DataError;
use bastion_core::domain::security_context::{AuthError, SessionProof};
use bastion_core::domain::tenant::TenantId;
use bastion_core::infrastructure::scoped_storage::{InMemoryScopedStore, ScopeReset};
use bastion_core::infrastructure::SecurityAuditLogger;
use chrono::{Duration, Utc};

fn executor(store: &InMemoryScopedStore, audit: Arc<SecurityAuditLogger>) -> Arc<TenantScopedExecutor<InMemoryScopedStore>> {
    Arc::new(TenantScopedExecutor::new(store.clone(), audit))
}

fn account(name: &str) -> NewAccount {
    NewAccount {
        name: name.to_string(),
        currency: "USD".to_string(),
    }
}

#[tokio::test]
async fn concurrent_tenants_see_disjoint_rows() {
    let store = InMemoryScopedStore::new();
    let exec = executor(&store, Arc::new(SecurityAuditLogger::new()));
    let tenant_1 = TenantId::new();
    let tenant_2 = TenantId::new();

    let mut handles = Vec::new();
    for (tenant, prefix) in [(tenant_1, "t1"), (tenant_2, "t2")] {
        for i in 0..10 {
            let exec = exec.clone();
            let name = format!("{}-{}", prefix, i);
            handles.push(tokio::spawn(async move {
                let ctx = common::context(tenant, &["ledger.*"]).await;
                exec.execute(&ctx, move |tx| {
                    Box::pin(async move { tx.open_account(&account(&name)).await })
                })
                .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let ctx_1 = common::context(tenant_1, &["ledger.*"]).await;
    let ctx_2 = common::context(tenant_2, &["ledger.*"]).await;
    let (rows_1, rows_2) = tokio::join!(
        exec.execute(&ctx_1, |tx| Box::pin(async move { tx.list_accounts().await })),
        exec.execute(&ctx_2, |tx| Box::pin(async move { tx.list_accounts().await })),
    );
    let rows_1 = rows_1.unwrap();
    let rows_2 = rows_2.unwrap();

    assert_eq!(rows_1.len(), 10);
    assert_eq!(rows_2.len(), 10);
    assert!(rows_1.iter().all(|a| a.tenant_id == tenant_1 && a.name.starts_with("t1-")));
    assert!(rows_2.iter().all(|a| a.tenant_id == tenant_2 && a.name.starts_with("t2-")));
    assert!(store.idle_sessions() > 0);
    assert_eq!(store.idle_scoped_sessions(), 0);
}

#[tokio::test]
async fn leftover_slot_scope_never_leaks_to_next_tenant() {
    let store = InMemoryScopedStore::new();
    store.set_scope_reset(ScopeReset::Skip);
    let exec = executor(&store, Arc::new(SecurityAuditLogger::new()));
    let previous = common::context(TenantId::new(), &["ledger.*"]).await;
    let next = common::context(TenantId::new(), &["ledger.*"]).await;

    exec.execute(&previous, |tx| Box::pin(async move { tx.open_account(&account("Payroll")).await }))
        .await
        .unwrap();
    assert_eq!(store.idle_scoped_sessions(), 1);

    let seen = exec
        .execute(&next, |tx| Box::pin(async move { tx.list_accounts().await }))
        .await
        .unwrap();
    assert!(seen.is_empty());

    let opened = exec
        .execute(&next, |tx| Box::pin(async move { tx.open_account(&account("Ops")).await }))
        .await
        .unwrap();
    assert_eq!(opened.tenant_id, next.tenant_id());
}

#[tokio::test]
async fn failed_slot_reset_discards_the_connection() {
    let store = InMemoryScopedStore::new();
    store.set_scope_reset(ScopeReset::Fail);
    let exec = executor(&store, Arc::new(SecurityAuditLogger::new()));
    let ctx = common::context(TenantId::new(), &["ledger.*"]).await;

    exec.execute(&ctx, |tx| Box::pin(async move { tx.list_accounts().await }))
        .await
        .unwrap();
    assert_eq!(store.idle_sessions(), 0);
    assert_eq!(store.discarded_sessions(), 1);
}

#[tokio::test]
async fn foreign_account_is_invisible_and_unwritable() {
    let store = InMemoryScopedStore::new();
    let exec = executor(&store, Arc::new(SecurityAuditLogger::new()));
    let owner = common::context(TenantId::new(), &["ledger.*"]).await;
    let intruder = common::context(TenantId::new(), &["ledger.*"]).await;

    let opened = exec
        .execute(&owner, |tx| Box::pin(async move { tx.open_account(&account("Reserve")).await }))
        .await
        .unwrap();
    let id = opened.id;

    let seen = exec
        .execute(&intruder, move |tx| Box::pin(async move { tx.find_account(id).await }))
        .await
        .unwrap();
    assert!(seen.is_none());

    let write = exec
        .execute(&intruder, move |tx| {
            Box::pin(async move {
                tx.record_entry(&NewEntry {
                    account_id: id,
                    amount_minor: -50_000,
                    memo: Some("drain".to_string()),
                })
                .await
            })
        })
        .await;
    assert!(matches!(write, Err(DataError::ConstraintViolation(_))));
}

#[tokio::test]
async fn scope_failure_is_fail_closed_and_audited() {
    let store = InMemoryScopedStore::new();
    let audit = Arc::new(SecurityAuditLogger::new());
    let exec = executor(&store, audit.clone());
    let ctx = common::context(TenantId::new(), &["ledger.*"]).await;

    store.fail_scope_application(true);
    let result = exec
        .execute(&ctx, |tx| Box::pin(async move { tx.open_account(&account("Never")).await }))
        .await;

    assert!(matches!(result, Err(DataError::ScopeApplicationFailed)));
    assert_eq!(store.statements_executed(), 0);
    assert!(store.all_accounts().is_empty());
    let incidents = audit.recent();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].kind(), "scope_application_failed");

    store.fail_scope_application(false);
    assert!(exec
        .execute(&ctx, |tx| Box::pin(async move { tx.list_accounts().await }))
        .await
        .is_ok());
}

#[tokio::test]
async fn expired_session_opens_no_transaction() {
    let store = InMemoryScopedStore::new();
    let manager = common::context_manager(Arc::new(SecurityAuditLogger::new()));
    let expires_at = Utc::now();
    let token = common::session_token(TenantId::new(), &["ledger.*"], expires_at);

    let result = manager
        .build_at(&SessionProof::bearer(token), expires_at + Duration::seconds(1))
        .await;

    // no context, so the executor is never reached
    assert!(matches!(result, Err(AuthError::Expired { .. })));
    assert_eq!(store.idle_sessions(), 0);
    assert_eq!(store.statements_executed(), 0);
}

#[tokio::test]
async fn rollback_leaves_no_partial_writes() {
    let store = InMemoryScopedStore::new();
    let exec = executor(&store, Arc::new(SecurityAuditLogger::new()));
    let ctx = common::context(TenantId::new(), &["ledger.*"]).await;

    let result: Result<(), DataError> = exec
        .execute(&ctx, |tx| {
            Box::pin(async move {
                let opened = tx.open_account(&account("Half")).await?;
                tx.record_entry(&NewEntry {
                    account_id: opened.id,
                    amount_minor: 100,
                    memo: None,
                })
                .await?;
                Err(DataError::Aborted("validation failed downstream".to_string()))
            })
        })
        .await;

    assert!(matches!(result, Err(DataError::Aborted(_))));
    assert!(store.all_accounts().is_empty());
}
