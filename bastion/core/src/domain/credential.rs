// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Aggregate
//!
//! Per-provider partner API secrets, owned by the
//! [`crate::application::credential_vault::CredentialVault`].
//!
//! ## Rotation State Machine
//!
//! ```text
//!   Active(v) ──begin_rotation──► Rotating(v, pending) ──complete──► Active(v+1)
//!       ▲                              │
//!       └──────────abort───────────────┘
//!   any ──revoke──► Revoked
//! ```
//!
//! While `Rotating`, readers keep receiving material derived from version `v`.
//!
//! A [`CredentialRecord`] never leaves the vault. What crosses the boundary is
//! an [`ActiveCredential`]: a key derived from the secret, scoped to one
//! provider and one UTC day, with no accessor for the secret itself.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Partner API identifier, e.g. `bank-api`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(name: impl Into<String>) -> Result<Self, VaultError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(VaultError::InvalidProvider(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProviderId {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(value: ProviderId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationState {
    Active,
    Rotating,
    Revoked,
}

impl RotationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationState::Active => "active",
            RotationState::Rotating => "rotating",
            RotationState::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for RotationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RotationState::Active),
            "rotating" => Ok(RotationState::Rotating),
            "revoked" => Ok(RotationState::Revoked),
            other => Err(format!("unknown rotation state '{}'", other)),
        }
    }
}

/// AES-256-GCM ciphertext with its nonce, both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub nonce: String,
    pub ciphertext: String,
}

impl EncryptedSecret {
    /// Single-string storage form `nonce:ciphertext`.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.nonce, self.ciphertext)
    }

    pub fn decode(s: &str) -> Result<Self, VaultError> {
        let (nonce, ciphertext) = s
            .split_once(':')
            .ok_or_else(|| VaultError::Encryption("expected format nonce:ciphertext".to_string()))?;
        Ok(Self {
            nonce: nonce.to_string(),
            ciphertext: ciphertext.to_string(),
        })
    }
}

/// Vault-internal record. Mutated only by rotation and revocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub provider: ProviderId,
    pub encrypted_secret: EncryptedSecret,
    /// Staged secret while `rotation_state == Rotating`
    pub pending_secret: Option<EncryptedSecret>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_state: RotationState,
}

impl CredentialRecord {
    pub fn new(
        provider: ProviderId,
        encrypted_secret: EncryptedSecret,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            provider,
            encrypted_secret,
            pending_secret: None,
            version: 1,
            created_at: Utc::now(),
            rotated_at: None,
            expires_at,
            rotation_state: RotationState::Active,
        }
    }

    pub fn metadata(&self) -> CredentialMetadata {
        CredentialMetadata {
            provider: self.provider.clone(),
            version: self.version,
            rotation_state: self.rotation_state,
            created_at: self.created_at,
            rotated_at: self.rotated_at,
            expires_at: self.expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }
}

/// Optimistic-concurrency guard for record updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRevision {
    pub version: u32,
    pub rotation_state: RotationState,
}

impl From<&CredentialRecord> for RecordRevision {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            version: record.version,
            rotation_state: record.rotation_state,
        }
    }
}

/// Secret-free view of a record, safe to return to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub provider: ProviderId,
    pub version: u32,
    pub rotation_state: RotationState,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Short-lived signing material handed out by the vault.
///
/// Holds a key derived from the provider secret (see
/// [`crate::infrastructure::signing::derive_signing_key`]), never the secret.
/// The key is only readable inside this crate, by the request signer.
pub struct ActiveCredential {
    provider: ProviderId,
    version: u32,
    key_id: String,
    valid_until: DateTime<Utc>,
    signing_key: SecretBox<[u8; 32]>,
}

impl ActiveCredential {
    pub(crate) fn new(
        provider: ProviderId,
        version: u32,
        key_id: String,
        valid_until: DateTime<Utc>,
        signing_key: [u8; 32],
    ) -> Self {
        Self {
            provider,
            version,
            key_id,
            valid_until,
            signing_key: SecretBox::new(Box::new(signing_key)),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Public key identifier sent alongside signatures.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub(crate) fn signing_key(&self) -> &[u8] {
        self.signing_key.expose_secret().as_slice()
    }
}

impl std::fmt::Debug for ActiveCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCredential")
            .field("provider", &self.provider)
            .field("version", &self.version)
            .field("key_id", &self.key_id)
            .field("valid_until", &self.valid_until)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("no credential stored for provider '{0}'")]
    NotFound(ProviderId),

    /// Another rotation for the same provider is in flight.
    #[error("rotation already in progress for provider '{0}'")]
    RotationConflict(ProviderId),

    #[error("no rotation in progress for provider '{0}'")]
    NoRotationInFlight(ProviderId),

    /// Fatal: the provider is quarantined until an operator releases it.
    #[error("credential for provider '{0}' failed to decrypt; provider quarantined")]
    DecryptionFailed(ProviderId),

    #[error("credential for provider '{0}' has been revoked")]
    Revoked(ProviderId),

    #[error("credential for provider '{0}' has expired")]
    Expired(ProviderId),

    #[error("credential for provider '{0}' already exists")]
    AlreadyExists(ProviderId),

    #[error("invalid provider name '{0}'")]
    InvalidProvider(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("credential storage error: {0}")]
    Storage(String),
}

impl From<crate::domain::repository::RepositoryError> for VaultError {
    fn from(err: crate::domain::repository::RepositoryError) -> Self {
        VaultError::Storage(err.to_string())
    }
}
