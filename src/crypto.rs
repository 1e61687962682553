#![allow(deprecated)]

use aes_gcm::{
    aead::{Aead, KeyInit},
    AeadCore, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use thiserror::Error;

const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be exactly 32 bytes or 64 hex characters")]
    KeyLength,
    #[error("invalid hex key: {0}")]
    KeyHex(#[from] hex::FromHexError),
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid encrypted data")]
    Truncated,
    #[error("cipher error: {0}")]
    Cipher(String),
    #[error("decrypted value is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Symmetric cipher for credential columns.
///
/// Ciphertext is stored as base64 of `nonce || aes-256-gcm(ciphertext+tag)`.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Arc<[u8; 32]>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn new(key: &str) -> Result<Self, CryptoError> {
        let key_bytes = match key.len() {
            32 => key.as_bytes().to_vec(),
            64 => hex::decode(key)?,
            _ => return Err(CryptoError::KeyLength),
        };
        if key_bytes.len() != 32 {
            return Err(CryptoError::KeyLength);
        }

        let mut buf = [0u8; 32];
        buf.copy_from_slice(&key_bytes);
        Ok(Self { key: Arc::new(buf) })
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;

        let mut combined = nonce.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = BASE64.decode(encoded)?;
        if data.len() < NONCE_LENGTH {
            return Err(CryptoError::Truncated);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;

        Ok(String::from_utf8(plaintext)?)
    }

    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}
