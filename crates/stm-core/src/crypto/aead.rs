//! ChaCha20-Poly1305 session box.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use zeroize::Zeroize;

use crate::constants::SESSION_KEY_LEN;
use crate::error::{Error, Result};

use super::nonce::WireNonce;

/// A session key, zeroized on drop.
///
/// Minted by the server at session start and carried to the client over
/// the trusted bootstrap channel as base64 text.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Parse a base64-encoded key.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| Error::key(format!("invalid base64: {}", e)))?;
        let key: [u8; SESSION_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::key(format!("key must be {} bytes", SESSION_KEY_LEN)))?;
        Ok(Self { key })
    }

    /// Export as base64 text for the bootstrap channel.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new((&self.key).into())
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.write_str("SessionKey(..)")
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Encrypt a packet plaintext under the given wire nonce.
pub fn encrypt(key: &SessionKey, nonce: WireNonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    key.cipher()
        .encrypt(Nonce::from_slice(&nonce.cipher_nonce()), plaintext)
        .map_err(|_| Error::protocol("encryption failed"))
}

/// Decrypt a packet ciphertext.
///
/// Returns `None` on authentication failure; callers drop the datagram
/// without feedback.
pub fn decrypt(key: &SessionKey, nonce: WireNonce, ciphertext: &[u8]) -> Option<Vec<u8>> {
    key.cipher()
        .decrypt(Nonce::from_slice(&nonce.cipher_nonce()), ciphertext)
        .ok()
}
