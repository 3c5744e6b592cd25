//! AES-256-GCM keyring implementing the key management port.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;

use trailguard_application::KeyManagementService;
use trailguard_core::{AppError, AppResult};

/// Local AES-256-GCM keyring.
///
/// Rotation adds a key and moves the active id; previously written records
/// stay readable through their recorded key id. Already-persisted records
/// are never re-encrypted.
pub struct AesKeyManagementService {
    ciphers: HashMap<String, Aes256Gcm>,
    active_key_id: String,
}

impl AesKeyManagementService {
    /// Creates a keyring from `key_id:hex` pairs; the first entry is active.
    ///
    /// Accepts the `AUDIT_ENCRYPTION_KEYS` format: comma-separated
    /// `key_id:64-hex-char` entries.
    pub fn from_spec(spec: &str) -> AppResult<Self> {
        let mut ciphers = HashMap::new();
        let mut active_key_id = None;

        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (key_id, hex_key) = entry.split_once(':').ok_or_else(|| {
                AppError::Validation(
                    "AUDIT_ENCRYPTION_KEYS entries must be 'key_id:hex'".to_owned(),
                )
            })?;

            let decoded = hex::decode(hex_key).map_err(|error| {
                AppError::Validation(format!("invalid hex for key '{key_id}': {error}"))
            })?;
            if decoded.len() != 32 {
                return Err(AppError::Validation(format!(
                    "key '{key_id}' must be exactly 32 bytes (64 hex chars)"
                )));
            }

            let mut key = [0u8; 32];
            key.copy_from_slice(&decoded);
            ciphers.insert(key_id.to_owned(), Aes256Gcm::new(&key.into()));
            if active_key_id.is_none() {
                active_key_id = Some(key_id.to_owned());
            }
        }

        let active_key_id = active_key_id.ok_or_else(|| {
            AppError::Validation("AUDIT_ENCRYPTION_KEYS must contain at least one key".to_owned())
        })?;

        Ok(Self {
            ciphers,
            active_key_id,
        })
    }

    /// Creates a single-key ring from raw bytes, mainly for tests.
    #[must_use]
    pub fn with_key(key_id: impl Into<String>, key_bytes: &[u8; 32]) -> Self {
        let key_id = key_id.into();
        let mut ciphers = HashMap::new();
        ciphers.insert(key_id.clone(), Aes256Gcm::new(key_bytes.into()));
        Self {
            ciphers,
            active_key_id: key_id,
        }
    }

    fn cipher(&self, key_id: &str) -> AppResult<&Aes256Gcm> {
        self.ciphers.get(key_id).ok_or_else(|| {
            AppError::Encryption(format!("encryption key '{key_id}' is not available"))
        })
    }
}

#[async_trait]
impl KeyManagementService for AesKeyManagementService {
    async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> AppResult<Vec<u8>> {
        let cipher = self.cipher(key_id)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|error| AppError::Encryption(format!("failed to encrypt payload: {error}")))?;

        // Prepend the 12-byte nonce to the ciphertext for storage.
        let mut result = Vec::with_capacity(nonce.len() + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    async fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> AppResult<Vec<u8>> {
        let cipher = self.cipher(key_id)?;
        if ciphertext.len() < 12 {
            return Err(AppError::Encryption(
                "ciphertext too short: missing nonce".to_owned(),
            ));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(12);
        let nonce_array: [u8; 12] = nonce_bytes
            .try_into()
            .map_err(|_| AppError::Encryption("nonce must be exactly 12 bytes".to_owned()))?;
        let nonce = Nonce::from(nonce_array);

        cipher
            .decrypt(&nonce, encrypted)
            .map_err(|error| AppError::Encryption(format!("failed to decrypt payload: {error}")))
    }

    fn active_key_id(&self) -> String {
        self.active_key_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use trailguard_application::KeyManagementService;
    use trailguard_core::AppResult;

    use super::AesKeyManagementService;

    #[tokio::test]
    async fn encrypt_decrypt_round_trips() -> AppResult<()> {
        let keyring = AesKeyManagementService::with_key("key-1", &[42u8; 32]);

        let plaintext = b"compressed audit payload";
        let encrypted = keyring.encrypt(plaintext, "key-1").await?;
        let decrypted = keyring.decrypt(encrypted.as_slice(), "key-1").await?;

        assert_eq!(decrypted.as_slice(), plaintext);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_id_is_an_encryption_error() {
        let keyring = AesKeyManagementService::with_key("key-1", &[42u8; 32]);
        let result = keyring.encrypt(b"payload", "key-2").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rotation_keeps_old_keys_readable() -> AppResult<()> {
        let old_hex = "2a".repeat(32);
        let new_hex = "63".repeat(32);

        let before = AesKeyManagementService::from_spec(format!("key-1:{old_hex}").as_str())?;
        let encrypted = before.encrypt(b"payload", "key-1").await?;

        // Rotated ring: key-2 active for new writes, key-1 still present.
        let after = AesKeyManagementService::from_spec(
            format!("key-2:{new_hex},key-1:{old_hex}").as_str(),
        )?;
        assert_eq!(after.active_key_id(), "key-2");

        let decrypted = after.decrypt(encrypted.as_slice(), "key-1").await?;
        assert_eq!(decrypted.as_slice(), b"payload");
        Ok(())
    }

    #[test]
    fn malformed_spec_is_rejected() {
        assert!(AesKeyManagementService::from_spec("not-a-key").is_err());
        assert!(AesKeyManagementService::from_spec("key-1:zz").is_err());
        assert!(AesKeyManagementService::from_spec("").is_err());
    }
}
