// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Credential rotation under load.
//!
//! Calls signed before or during a rotation keep the old version; calls after
//! completion use the new one. Concurrent rotations of one provider conflict.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bastion_core::application::{CredentialVault, OutboundProxy};
use bastion_core::domain::config::OutboundConfig;
use bastion_core::domain::credential::{CredentialRecord, ProviderId, RecordRevision, RotationState, VaultError};
use bastion_core::domain::outbound::{ProviderEndpoint, RequestSpec};
use bastion_core::domain::repository::{CredentialRepository, RepositoryError};
use bastion_core::domain::tenant::TenantId;
use bastion_core::infrastructure::repositories::InMemoryCredentialRepository;
use bastion_core::infrastructure::{MasterKey, SecurityAuditLogger};

/// Repository whose compare-and-swap takes a while, so a rotation holds its
/// lock long enough for a competitor to arrive.
struct SlowRepository {
    inner: InMemoryCredentialRepository,
    delay: Duration,
}

#[async_trait]
impl CredentialRepository for SlowRepository {
    async fn find(&self, provider: &ProviderId) -> Result<Option<CredentialRecord>, RepositoryError> {
        self.inner.find(provider).await
    }

    async fn revision(&self, provider: &ProviderId) -> Result<Option<RecordRevision>, RepositoryError> {
        self.inner.revision(provider).await
    }

    async fn insert(&self, record: &CredentialRecord) -> Result<(), RepositoryError> {
        self.inner.insert(record).await
    }

    async fn update_if(&self, expected: RecordRevision, record: &CredentialRecord) -> Result<bool, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_if(expected, record).await
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, RepositoryError> {
        self.inner.list().await
    }
}

fn bank() -> ProviderId {
    ProviderId::new("bank-api").unwrap()
}

fn vault_over(repository: Arc<dyn CredentialRepository>) -> Arc<CredentialVault> {
    Arc::new(CredentialVault::new(
        repository,
        MasterKey::from_bytes(&[5u8; 32]).unwrap(),
        Arc::new(SecurityAuditLogger::new()),
    ))
}

#[tokio::test]
async fn rotation_switches_versions_for_later_calls_only() {
    let mut server = mockito::Server::new_async().await;
    let v1 = server
        .mock("GET", "/v1/balance")
        .match_header("x-bastion-credential-version", "1")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;
    let v2 = server
        .mock("GET", "/v1/balance")
        .match_header("x-bastion-credential-version", "2")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let vault = vault_over(Arc::new(InMemoryCredentialRepository::new()));
    vault.put(&bank(), b"v1-secret", None).await.unwrap();
    let proxy = OutboundProxy::new(
        vault.clone(),
        vec![ProviderEndpoint {
            provider: bank(),
            base_url: url::Url::parse(&server.url()).unwrap(),
            timeout: Duration::from_secs(2),
            requests_per_second: None,
        }],
        &OutboundConfig::default(),
        Arc::new(SecurityAuditLogger::new()),
    )
    .unwrap();
    let ctx = common::context(TenantId::new(), &["providers.bank-api"]).await;

    // signed before the rotation starts
    let before = proxy.call(&ctx, "bank-api", RequestSpec::get("/v1/balance")).await.unwrap();
    assert_eq!(before.credential_version, 1);

    // in flight while the new secret is staged
    vault.begin_rotation(&bank(), b"v2-secret").await.unwrap();
    let during = proxy.call(&ctx, "bank-api", RequestSpec::get("/v1/balance")).await.unwrap();
    assert_eq!(during.credential_version, 1);

    let ack = vault.complete_rotation(&bank()).await.unwrap();
    assert_eq!(ack.version, 2);
    let after = proxy.call(&ctx, "bank-api", RequestSpec::get("/v1/balance")).await.unwrap();
    assert_eq!(after.credential_version, 2);

    v1.assert_async().await;
    v2.assert_async().await;
}

#[tokio::test]
async fn concurrent_rotations_conflict() {
    let vault = vault_over(Arc::new(SlowRepository {
        inner: InMemoryCredentialRepository::new(),
        delay: Duration::from_millis(100),
    }));
    vault.put(&bank(), b"v1-secret", None).await.unwrap();

    let first = {
        let vault = vault.clone();
        tokio::spawn(async move { vault.rotate(&bank(), b"v2-secret").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = vault.rotate(&bank(), b"v3-secret").await;

    assert_eq!(second, Err(VaultError::RotationConflict(bank())));
    let ack = first.await.unwrap().unwrap();
    assert_eq!((ack.previous_version, ack.version), (1, 2));

    let listed = vault.list().await.unwrap();
    assert_eq!(listed[0].version, 2);
    assert_eq!(listed[0].rotation_state, RotationState::Active);
}

#[tokio::test]
async fn readers_never_wait_on_rotation() {
    let vault = vault_over(Arc::new(SlowRepository {
        inner: InMemoryCredentialRepository::new(),
        delay: Duration::from_millis(300),
    }));
    vault.put(&bank(), b"v1-secret", None).await.unwrap();
    vault.get(&bank()).await.unwrap();

    let rotation = {
        let vault = vault.clone();
        tokio::spawn(async move { vault.rotate(&bank(), b"v2-secret").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = std::time::Instant::now();
    let credential = vault.get(&bank()).await.unwrap();
    assert_eq!(credential.version(), 1);
    assert!(started.elapsed() < Duration::from_millis(100));

    rotation.await.unwrap().unwrap();
    assert_eq!(vault.get(&bank()).await.unwrap().version(), 2);
}

#[tokio::test]
async fn two_processes_cannot_interleave_rotations() {
    // two vaults over one store, as two bastion processes over one database
    let shared = InMemoryCredentialRepository::new();
    let node_a = vault_over(Arc::new(shared.clone()));
    let node_b = vault_over(Arc::new(shared.clone()));
    node_a.put(&bank(), b"v1-secret", None).await.unwrap();

    node_a.begin_rotation(&bank(), b"v2-from-a").await.unwrap();
    assert_eq!(
        node_b.rotate(&bank(), b"v2-from-b").await,
        Err(VaultError::RotationConflict(bank()))
    );
    assert_eq!(node_a.complete_rotation(&bank()).await.unwrap().version, 2);
    assert_eq!(node_b.rotate(&bank(), b"v3-from-b").await.unwrap().version, 3);
}

#[tokio::test]
async fn lost_swap_resyncs_the_loser() {
    let shared = InMemoryCredentialRepository::new();
    let slow = |delay| {
        vault_over(Arc::new(SlowRepository {
            inner: shared.clone(),
            delay: Duration::from_millis(delay),
        }))
    };
    let (node_a, node_b) = (slow(50), slow(150));
    node_a.put(&bank(), b"v1-secret", None).await.unwrap();

    // both read Active v1 before either swap lands
    let provider = bank();
    let (a, b) = tokio::join!(
        node_a.begin_rotation(&provider, b"v2-from-a"),
        node_b.begin_rotation(&provider, b"v2-from-b"),
    );
    assert!(a.is_ok());
    assert_eq!(b, Err(VaultError::RotationConflict(bank())));

    // the winner's staged secret can be activated from either node
    assert_eq!(node_b.complete_rotation(&bank()).await.unwrap().version, 2);
}

#[tokio::test]
async fn revoke_from_another_process_blocks_next_get() {
    let shared = InMemoryCredentialRepository::new();
    let gateway = vault_over(Arc::new(shared.clone()));
    let operator = vault_over(Arc::new(shared.clone()));
    gateway.put(&bank(), b"v1-secret", None).await.unwrap();
    assert_eq!(gateway.get(&bank()).await.unwrap().version(), 1);

    operator.revoke(&bank()).await.unwrap();
    assert_eq!(gateway.get(&bank()).await.unwrap_err(), VaultError::Revoked(bank()));
}

#[tokio::test]
async fn tampered_record_quarantines_provider() {
    let shared = InMemoryCredentialRepository::new();
    let vault = vault_over(Arc::new(shared.clone()));
    vault.put(&bank(), b"v1-secret", None).await.unwrap();

    // re-encrypted under a different master key: authentication tag fails
    let foreign = MasterKey::from_bytes(&[6u8; 32]).unwrap();
    let mut record = shared.find(&bank()).await.unwrap().unwrap();
    record.encrypted_secret = foreign.encrypt(b"v1-secret").unwrap();
    shared.overwrite(record);
    vault.refresh(&bank()).await.unwrap();

    assert_eq!(vault.get(&bank()).await.unwrap_err(), VaultError::DecryptionFailed(bank()));
    assert!(vault.is_quarantined(&bank()));
    // rotation with a fresh secret is how an operator recovers
    vault.rotate(&bank(), b"v2-secret").await.unwrap();
    assert!(!vault.is_quarantined(&bank()));
    assert_eq!(vault.get(&bank()).await.unwrap().version(), 2);
}
