// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Credential Vault
//!
//! Sole owner of partner API secrets. Secrets are AES-256-GCM encrypted in the
//! [`CredentialRepository`]; decrypted bytes exist only inside [`CredentialVault::get`]
//! long enough to derive an [`ActiveCredential`].
//!
//! # Concurrency
//!
//! - Reads go through a `DashMap` snapshot and never wait on a rotation. Each
//!   read first compares the snapshot's revision with the stored one, so a
//!   revoke or rotation by another process is seen on the next `get`.
//! - Rotations are serialized per provider by a `tokio::sync::Mutex` taken
//!   with `try_lock`; a second rotation fails fast with `RotationConflict`.
//! - Every write is a compare-and-swap on the stored revision, so processes
//!   sharing one database cannot interleave rotations either.
//! - A record that fails to decrypt quarantines its provider until
//!   [`CredentialVault::release_quarantine`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::domain::credential::{
    ActiveCredential, CredentialMetadata, CredentialRecord, EncryptedSecret, ProviderId, RecordRevision,
    RotationState, VaultError,
};
use crate::domain::repository::{CredentialRepository, RepositoryError};
use crate::infrastructure::audit::{SecurityAuditLogger, SecurityIncident};
use crate::infrastructure::crypto::MasterKey;
use crate::infrastructure::signing::{derive_signing_key, key_id};

/// Outcome of a completed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationAck {
    pub provider: ProviderId,
    pub previous_version: u32,
    pub version: u32,
}

pub struct CredentialVault {
    repository: Arc<dyn CredentialRepository>,
    master_key: MasterKey,
    snapshot: DashMap<ProviderId, CredentialRecord>,
    rotation_locks: DashMap<ProviderId, Arc<Mutex<()>>>,
    quarantined: DashMap<ProviderId, DateTime<Utc>>,
    audit: Arc<SecurityAuditLogger>,
    credential_ttl: Duration,
}

impl CredentialVault {
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        master_key: MasterKey,
        audit: Arc<SecurityAuditLogger>,
    ) -> Self {
        Self {
            repository,
            master_key,
            snapshot: DashMap::new(),
            rotation_locks: DashMap::new(),
            quarantined: DashMap::new(),
            audit,
            credential_ttl: Duration::minutes(5),
        }
    }

    /// Upper bound on an [`ActiveCredential`]'s validity window.
    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = ttl;
        self
    }

    /// Store the first secret for a provider (version 1).
    pub async fn put(
        &self,
        provider: &ProviderId,
        secret: &[u8],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialMetadata, VaultError> {
        let encrypted = self.encrypt(secret)?;
        let record = CredentialRecord::new(provider.clone(), encrypted, expires_at);
        match self.repository.insert(&record).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(VaultError::AlreadyExists(provider.clone())),
            Err(e) => return Err(e.into()),
        }
        info!(provider = %provider, "Stored credential version 1");
        let metadata = record.metadata();
        self.snapshot.insert(provider.clone(), record);
        Ok(metadata)
    }

    pub async fn get(&self, provider: &ProviderId) -> Result<ActiveCredential, VaultError> {
        self.get_at(provider, Utc::now()).await
    }

    /// Derive signing material for `provider` as of `now`. While a rotation
    /// is staged this keeps serving the previous version.
    pub async fn get_at(&self, provider: &ProviderId, now: DateTime<Utc>) -> Result<ActiveCredential, VaultError> {
        if self.quarantined.contains_key(provider) {
            return Err(VaultError::DecryptionFailed(provider.clone()));
        }

        let record = self.current(provider).await?;

        if record.rotation_state == RotationState::Revoked {
            return Err(VaultError::Revoked(provider.clone()));
        }
        if record.is_expired_at(now) {
            return Err(VaultError::Expired(provider.clone()));
        }

        let secret = match self.master_key.decrypt(&record.encrypted_secret) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(provider = %provider, "Credential decryption failed: {}", e);
                self.quarantine(provider, now);
                return Err(VaultError::DecryptionFailed(provider.clone()));
            }
        };

        let date = now.date_naive();
        let signing_key = derive_signing_key(secret.expose_secret(), provider, date);
        let mut valid_until = now + self.credential_ttl;
        if let Some(expires_at) = record.expires_at {
            valid_until = valid_until.min(expires_at);
        }

        Ok(ActiveCredential::new(
            provider.clone(),
            record.version,
            key_id(provider, record.version, date),
            valid_until,
            signing_key,
        ))
    }

    /// Stage a new secret. `get` keeps serving the current version until
    /// [`complete_rotation`](Self::complete_rotation).
    pub async fn begin_rotation(&self, provider: &ProviderId, new_secret: &[u8]) -> Result<CredentialMetadata, VaultError> {
        let _guard = self.rotation_guard(provider)?;
        self.begin_locked(provider, new_secret).await
    }

    pub async fn complete_rotation(&self, provider: &ProviderId) -> Result<RotationAck, VaultError> {
        let _guard = self.rotation_guard(provider)?;
        self.complete_locked(provider).await
    }

    /// Discard a staged secret and return to `Active` on the current version.
    pub async fn abort_rotation(&self, provider: &ProviderId) -> Result<CredentialMetadata, VaultError> {
        let _guard = self.rotation_guard(provider)?;
        let current = self.load(provider).await?;
        if current.rotation_state != RotationState::Rotating {
            return Err(VaultError::NoRotationInFlight(provider.clone()));
        }
        let mut next = current.clone();
        next.pending_secret = None;
        next.rotation_state = RotationState::Active;
        self.swap(&current, next, || VaultError::RotationConflict(provider.clone()))
            .await
            .map(|r| r.metadata())
            .inspect(|_| info!(provider = %provider, "Rotation aborted"))
    }

    /// `Active(v) -> Rotating -> Active(v+1)` under one lock hold.
    pub async fn rotate(&self, provider: &ProviderId, new_secret: &[u8]) -> Result<RotationAck, VaultError> {
        let _guard = self.rotation_guard(provider)?;
        self.begin_locked(provider, new_secret).await?;
        match self.complete_locked(provider).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                warn!(provider = %provider, "Rotation could not complete: {}", e);
                Err(e)
            }
        }
    }

    /// Future `get` calls fail. Credentials already handed out are unaffected.
    pub async fn revoke(&self, provider: &ProviderId) -> Result<CredentialMetadata, VaultError> {
        // revocation must win over a concurrent rotation, so retry lost swaps
        for _ in 0..3 {
            let current = self.load(provider).await?;
            if current.rotation_state == RotationState::Revoked {
                return Ok(current.metadata());
            }
            let mut next = current.clone();
            next.rotation_state = RotationState::Revoked;
            next.pending_secret = None;
            match self.swap(&current, next, || VaultError::RotationConflict(provider.clone())).await {
                Ok(record) => {
                    warn!(provider = %provider, version = record.version, "Credential revoked");
                    return Ok(record.metadata());
                }
                Err(VaultError::RotationConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(VaultError::RotationConflict(provider.clone()))
    }

    /// Reload a provider's record from durable storage, replacing the cached
    /// snapshot. Used after a partner rejects a signature.
    pub async fn refresh(&self, provider: &ProviderId) -> Result<CredentialMetadata, VaultError> {
        self.load(provider).await.map(|r| r.metadata())
    }

    /// Lift a quarantine after an operator repaired the stored record.
    /// Returns whether the provider was quarantined.
    pub async fn release_quarantine(&self, provider: &ProviderId) -> Result<bool, VaultError> {
        let was_quarantined = self.quarantined.remove(provider).is_some();
        self.load(provider).await?;
        if was_quarantined {
            info!(provider = %provider, "Quarantine released");
        }
        Ok(was_quarantined)
    }

    pub fn is_quarantined(&self, provider: &ProviderId) -> bool {
        self.quarantined.contains_key(provider)
    }

    /// Metadata for every stored credential. Never includes secrets.
    pub async fn list(&self) -> Result<Vec<CredentialMetadata>, VaultError> {
        Ok(self.repository.list().await?.iter().map(CredentialRecord::metadata).collect())
    }

    fn encrypt(&self, secret: &[u8]) -> Result<EncryptedSecret, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::Encryption("secret cannot be empty".to_string()));
        }
        self.master_key
            .encrypt(secret)
            .map_err(|e| VaultError::Encryption(e.to_string()))
    }

    fn quarantine(&self, provider: &ProviderId, now: DateTime<Utc>) {
        self.quarantined.insert(provider.clone(), now);
        self.audit.record(SecurityIncident::DecryptionFailed {
            provider: provider.clone(),
        });
    }

    fn rotation_guard(&self, provider: &ProviderId) -> Result<OwnedMutexGuard<()>, VaultError> {
        let lock = self
            .rotation_locks
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| VaultError::RotationConflict(provider.clone()))
    }

    /// Snapshot record if its revision still matches storage, else a fresh load.
    async fn current(&self, provider: &ProviderId) -> Result<CredentialRecord, VaultError> {
        let stored = match self.repository.revision(provider).await? {
            Some(revision) => revision,
            None => {
                self.snapshot.remove(provider);
                return Err(VaultError::NotFound(provider.clone()));
            }
        };
        if let Some(cached) = self.snapshot.get(provider).map(|r| r.value().clone()) {
            if RecordRevision::from(&cached) == stored {
                return Ok(cached);
            }
        }
        self.load(provider).await
    }

    async fn load(&self, provider: &ProviderId) -> Result<CredentialRecord, VaultError> {
        let record = self
            .repository
            .find(provider)
            .await?
            .ok_or_else(|| VaultError::NotFound(provider.clone()))?;
        self.snapshot.insert(provider.clone(), record.clone());
        Ok(record)
    }

    async fn swap(
        &self,
        current: &CredentialRecord,
        next: CredentialRecord,
        on_conflict: impl FnOnce() -> VaultError,
    ) -> Result<CredentialRecord, VaultError> {
        if !self.repository.update_if(RecordRevision::from(current), &next).await? {
            // someone else changed the record; resync the snapshot
            if let Err(e) = self.load(&current.provider).await {
                warn!(provider = %current.provider, "Snapshot resync after lost swap failed: {}", e);
            }
            return Err(on_conflict());
        }
        self.snapshot.insert(next.provider.clone(), next.clone());
        Ok(next)
    }

    async fn begin_locked(&self, provider: &ProviderId, new_secret: &[u8]) -> Result<CredentialMetadata, VaultError> {
        let current = self.load(provider).await?;
        match current.rotation_state {
            RotationState::Active => {}
            RotationState::Rotating => return Err(VaultError::RotationConflict(provider.clone())),
            RotationState::Revoked => return Err(VaultError::Revoked(provider.clone())),
        }

        let mut next = current.clone();
        next.pending_secret = Some(self.encrypt(new_secret)?);
        next.rotation_state = RotationState::Rotating;
        let staged = self
            .swap(&current, next, || VaultError::RotationConflict(provider.clone()))
            .await?;
        info!(provider = %provider, version = staged.version, "Rotation staged");
        Ok(staged.metadata())
    }

    async fn complete_locked(&self, provider: &ProviderId) -> Result<RotationAck, VaultError> {
        let current = self.load(provider).await?;
        if current.rotation_state != RotationState::Rotating {
            return Err(VaultError::NoRotationInFlight(provider.clone()));
        }
        let pending = current
            .pending_secret
            .clone()
            .ok_or_else(|| VaultError::NoRotationInFlight(provider.clone()))?;

        let mut next = current.clone();
        next.encrypted_secret = pending;
        next.pending_secret = None;
        next.version = current.version + 1;
        next.rotation_state = RotationState::Active;
        next.rotated_at = Some(Utc::now());

        let active = self
            .swap(&current, next, || VaultError::RotationConflict(provider.clone()))
            .await?;
        // the new secret replaces whatever failed to decrypt before
        self.quarantined.remove(provider);
        metrics::counter!("bastion_vault_rotations_total").increment(1);
        info!(
            provider = %provider,
            from = current.version,
            to = active.version,
            "Rotation completed"
        );
        Ok(RotationAck {
            provider: provider.clone(),
            previous_version: current.version,
            version: active.version,
        })
    }
}
