// ABOUTME: Cryptographic utilities: at-rest credential encryption, password hashing
// ABOUTME: Ed25519 signing keyring with previous-key fallback for rotation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

//! # Cryptographic Utilities
//!
//! Three concerns live here, each behind a narrow type:
//!
//! - [`SecretVault`]: AES-256-GCM encryption for `auth_value` columns. The
//!   key is held outside the database; decrypted material only ever exists
//!   inside a [`SecretString`], which zeroizes its buffer on drop.
//! - Password hashing with Argon2id ([`hash_password`] / [`verify_password`]).
//! - [`SigningKeyring`]: Ed25519 signatures over exported documents, with an
//!   optional previous key accepted during rotation windows.

use crate::errors::{AppError, AppResult};
use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce length for AES-256-GCM
const NONCE_LEN: usize = 12;

/// A secret value that zeroizes its backing buffer on drop.
///
/// Decrypted `auth_value` material is only ever handed around as this type so
/// plaintext never outlives its use site.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Borrow the secret for immediate use
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(****)")
    }
}

/// Generate a fresh 32-byte encryption key
#[must_use]
pub fn generate_encryption_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Encrypts and decrypts credential material with a key held outside the DB
pub struct SecretVault {
    cipher: Aes256Gcm,
}

impl SecretVault {
    /// Build a vault from raw key bytes
    ///
    /// # Errors
    /// Returns an error if the key is not exactly 32 bytes.
    pub fn new(key_bytes: &[u8]) -> AppResult<Self> {
        if key_bytes.len() != 32 {
            return Err(AppError::invalid_input(
                "Encryption key must be exactly 32 bytes",
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build a vault from a base64-encoded key, generating an ephemeral key
    /// when none is configured (credentials then do not survive restarts).
    ///
    /// # Errors
    /// Returns an error if the configured key is malformed.
    pub fn from_config(encoded: Option<&str>) -> AppResult<Self> {
        match encoded {
            Some(b64) => {
                let bytes = BASE64
                    .decode(b64)
                    .map_err(|e| AppError::invalid_input(format!("Invalid encryption key: {e}")))?;
                Self::new(&bytes)
            }
            None => {
                tracing::warn!(
                    "MCPGATEWAY_ENCRYPTION_KEY not set; using an ephemeral key. \
                     Stored credentials will not be readable after restart"
                );
                Self::new(&generate_encryption_key())
            }
        }
    }

    /// Encrypt plaintext into a base64 `nonce || ciphertext` blob
    ///
    /// # Errors
    /// Returns `Internal` if encryption fails.
    pub fn encrypt(&self, plaintext: &SecretString) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.expose().as_bytes())
            .map_err(|e| AppError::internal(format!("Encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a blob produced by [`Self::encrypt`]
    ///
    /// # Errors
    /// Returns `Internal` if the blob is malformed or authentication fails.
    pub fn decrypt(&self, encoded: &str) -> AppResult<SecretString> {
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| AppError::internal(format!("Corrupt credential blob: {e}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(AppError::internal("Credential blob too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let mut plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::internal(format!("Decryption failed: {e}")))?;
        let text = String::from_utf8(plaintext.clone())
            .map_err(|e| AppError::internal(format!("Decrypted value not UTF-8: {e}")))?;
        plaintext.zeroize();
        Ok(SecretString::new(text))
    }
}

/// Hash a password with Argon2id
///
/// # Errors
/// Returns `Internal` if hashing fails.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("Password hashing failed: {e}")))
}

/// Verify a password against a stored Argon2id hash
///
/// # Errors
/// Returns `Internal` if the stored hash is malformed.
pub fn verify_password(password: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::internal(format!("Malformed password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Ed25519 signing keyring with a previous-key fallback for rotation.
///
/// Exported documents (the signed API-token catalog) are signed with the
/// current key. Verification accepts the previous key during a rotation
/// window so consumers holding older exports keep validating.
pub struct SigningKeyring {
    current: SigningKey,
    previous: Option<VerifyingKey>,
}

impl SigningKeyring {
    /// Generate a fresh keyring
    #[must_use]
    pub fn generate() -> Self {
        Self {
            current: SigningKey::generate(&mut rand::rngs::OsRng),
            previous: None,
        }
    }

    /// Restore a keyring from raw key material
    ///
    /// # Errors
    /// Returns an error if either key is malformed.
    pub fn from_bytes(current: &[u8; 32], previous: Option<&[u8; 32]>) -> AppResult<Self> {
        let current = SigningKey::from_bytes(current);
        let previous = previous
            .map(|bytes| {
                VerifyingKey::from_bytes(bytes)
                    .map_err(|e| AppError::internal(format!("Invalid previous key: {e}")))
            })
            .transpose()?;
        Ok(Self { current, previous })
    }

    /// Rotate: the current key becomes the previous verifier, a fresh key
    /// takes over signing.
    pub fn rotate(&mut self) {
        self.previous = Some(self.current.verifying_key());
        self.current = SigningKey::generate(&mut rand::rngs::OsRng);
    }

    /// Sign a payload; returns the hex-encoded signature
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.current.sign(payload).to_bytes())
    }

    /// The current public key, hex-encoded
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.current.verifying_key().to_bytes())
    }

    /// Verify a hex signature against the current key, falling back to the
    /// previous key when present
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        if self
            .current
            .verifying_key()
            .verify(payload, &signature)
            .is_ok()
        {
            return true;
        }
        self.previous
            .as_ref()
            .is_some_and(|prev| prev.verify(payload, &signature).is_ok())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn vault_round_trip() {
        let vault = SecretVault::new(&generate_encryption_key()).unwrap();
        let secret = SecretString::new("bearer hunter2".to_owned());
        let blob = vault.encrypt(&secret).unwrap();
        assert_ne!(blob, "bearer hunter2");
        let back = vault.decrypt(&blob).unwrap();
        assert_eq!(back.expose(), "bearer hunter2");
    }

    #[test]
    fn vault_rejects_wrong_key() {
        let vault_a = SecretVault::new(&generate_encryption_key()).unwrap();
        let vault_b = SecretVault::new(&generate_encryption_key()).unwrap();
        let blob = vault_a
            .encrypt(&SecretString::new("token".to_owned()))
            .unwrap();
        assert!(vault_b.decrypt(&blob).is_err());
    }

    #[test]
    fn vault_rejects_short_key() {
        assert!(SecretVault::new(b"short").is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn keyring_sign_verify_and_rotate() {
        let mut keyring = SigningKeyring::generate();
        let payload = b"token catalog v1";
        let sig = keyring.sign(payload);
        assert!(keyring.verify(payload, &sig));

        keyring.rotate();
        // Old signature still validates through the previous key
        assert!(keyring.verify(payload, &sig));
        // New signatures validate through the current key
        let sig2 = keyring.sign(payload);
        assert!(keyring.verify(payload, &sig2));
        // Garbage does not
        assert!(!keyring.verify(payload, "deadbeef"));
    }

    #[test]
    fn secret_string_debug_is_masked() {
        let secret = SecretString::new("visible".to_owned());
        assert_eq!(format!("{secret:?}"), "SecretString(****)");
    }
}
