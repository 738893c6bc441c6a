//! Message-at-rest encryption using AES-256-GCM.
//!
//! Notification payloads are encrypted before they reach the database and
//! decrypted on read. The key comes from configuration and is immutable for
//! the lifetime of the process.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits).
pub const KEY_SIZE: usize = 32;

/// An encrypted payload as it is persisted: base64 nonce plus base64
/// ciphertext, one fresh random nonce per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub nonce: String,
    pub ciphertext: String,
}

/// Process-wide cipher for notification message bodies.
#[derive(Clone)]
pub struct MessageCipher {
    key: [u8; KEY_SIZE],
}

impl MessageCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Parse a key from a hex or base64 string.
    pub fn from_key_string(key_str: &str) -> Result<Self> {
        Ok(Self::new(parse_key(key_str)?))
    }

    /// Generate a new random key, for tests and key provisioning.
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedMessage> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(EncryptedMessage {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        })
    }

    pub fn decrypt(&self, message: &EncryptedMessage) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let nonce_bytes = BASE64
            .decode(&message.nonce)
            .map_err(|e| anyhow!("Invalid nonce base64: {}", e))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!("Invalid nonce size"));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&message.ciphertext)
            .map_err(|e| anyhow!("Invalid ciphertext base64: {}", e))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 in decrypted value: {}", e))
    }
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Parse a 32-byte key from a hex or base64 string.
fn parse_key(key_str: &str) -> Result<[u8; KEY_SIZE]> {
    // Try hex first
    if key_str.len() == KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(key_str) {
            if bytes.len() == KEY_SIZE {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&bytes);
                return Ok(key);
            }
        }
    }

    let bytes = BASE64
        .decode(key_str.trim())
        .map_err(|e| anyhow!("Invalid base64 key: {}", e))?;

    if bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
