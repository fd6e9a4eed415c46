// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! At-rest encryption for vaulted provider secrets (AES-256-GCM).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;

use crate::domain::credential::EncryptedSecret;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("master key must be 32 bytes")]
    InvalidKeyLength,

    #[error("invalid key encoding: {0}")]
    InvalidEncoding(String),
}

/// Vault master key. Loaded once at startup from configuration.
pub struct MasterKey {
    key: SecretBox<[u8; KEY_SIZE]>,
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self {
            key: SecretBox::new(Box::new(key)),
        })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Fresh random key, base64 encoded, for `bastion config generate`.
    pub fn generate_base64() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        STANDARD.encode(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.key.expose_secret())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedSecret {
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn decrypt(&self, encrypted: &EncryptedSecret) -> Result<SecretBox<Vec<u8>>, CryptoError> {
        let nonce_bytes = STANDARD
            .decode(&encrypted.nonce)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed("invalid nonce length".to_string()));
        }
        let ciphertext = STANDARD
            .decode(&encrypted.ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid ciphertext: {}", e)))?;

        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))?;

        Ok(SecretBox::new(Box::new(plaintext)))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = MasterKey::from_bytes(&[42u8; 32]).unwrap();
        let encrypted = key.encrypt(b"partner-api-secret").unwrap();
        assert_ne!(encrypted.ciphertext, "partner-api-secret");

        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.expose_secret().as_slice(), b"partner-api-secret");
    }

    #[test]
    fn test_nonces_are_unique() {
        let key = MasterKey::from_bytes(&[1u8; 32]).unwrap();
        let a = key.encrypt(b"same").unwrap();
        let b = key.encrypt(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = MasterKey::from_bytes(&[1u8; 32]).unwrap();
        let other = MasterKey::from_bytes(&[2u8; 32]).unwrap();
        let encrypted = key.encrypt(b"secret").unwrap();
        assert!(matches!(other.decrypt(&encrypted), Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_key_parsing() {
        assert!(MasterKey::from_bytes(&[0u8; 16]).is_err());
        assert!(MasterKey::from_base64(&MasterKey::generate_base64()).is_ok());
        assert!(MasterKey::from_base64("%%%").is_err());
    }
}
