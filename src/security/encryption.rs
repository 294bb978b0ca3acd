// Field-level encryption envelope.
//
// AES-256-GCM with a key ring. Ciphertext is stored as
// `<key_id>:<nonce_b64>:<ciphertext_b64>` so keys can rotate without
// re-encrypting history: old envelopes name the key that sealed them.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, Result};

pub struct EncryptionService {
    keys: RwLock<HashMap<String, [u8; 32]>>,
    active_key_id: RwLock<String>,
}

impl EncryptionService {
    /// Build the service from the base64-encoded 32-byte master key. The
    /// master key becomes key `k1` and is active.
    pub fn new(master_key_b64: &str) -> Result<Self> {
        let service = Self {
            keys: RwLock::new(HashMap::new()),
            active_key_id: RwLock::new(String::new()),
        };
        service.add_key("k1", master_key_b64, true)?;
        Ok(service)
    }

    /// Add a key to the ring; optionally make it the active sealing key.
    pub fn add_key(&self, key_id: &str, key_b64: &str, activate: bool) -> Result<()> {
        let raw = BASE64
            .decode(key_b64)
            .map_err(|_| AppError::Configuration("encryption key is not valid base64".into()))?;
        let key: [u8; 32] = raw
            .try_into()
            .map_err(|_| AppError::Configuration("encryption key must be 32 bytes".into()))?;
        self.keys.write().insert(key_id.to_string(), key);
        if activate {
            *self.active_key_id.write() = key_id.to_string();
        }
        Ok(())
    }

    pub fn active_key_id(&self) -> String {
        self.active_key_id.read().clone()
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<String> {
        let key_id = self.active_key_id();
        let key = self
            .keys
            .read()
            .get(&key_id)
            .copied()
            .ok_or_else(|| AppError::Security("no active encryption key".into()))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AppError::Security("encryption failed".into()))?;

        Ok(format!(
            "{}:{}:{}",
            key_id,
            BASE64.encode(nonce),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt_bytes(&self, envelope: &str) -> Result<Vec<u8>> {
        let mut parts = envelope.splitn(3, ':');
        let (key_id, nonce_b64, ct_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return Err(AppError::Security("malformed ciphertext envelope".into())),
        };

        let key = self
            .keys
            .read()
            .get(key_id)
            .copied()
            .ok_or_else(|| AppError::Security(format!("unknown encryption key: {}", key_id)))?;
        let nonce_raw = BASE64
            .decode(nonce_b64)
            .map_err(|_| AppError::Security("malformed ciphertext envelope".into()))?;
        let ciphertext = BASE64
            .decode(ct_b64)
            .map_err(|_| AppError::Security("malformed ciphertext envelope".into()))?;
        if nonce_raw.len() != 12 {
            return Err(AppError::Security("malformed ciphertext envelope".into()));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|_| AppError::Security("decryption failed".into()))
    }

    pub fn encrypt_text(&self, plaintext: &str) -> Result<String> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    pub fn decrypt_text(&self, envelope: &str) -> Result<String> {
        let plaintext = self.decrypt_bytes(envelope)?;
        String::from_utf8(plaintext)
            .map_err(|_| AppError::Security("decrypted payload is not UTF-8".into()))
    }

    /// Structured data is serialized to JSON before encryption.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let raw = serde_json::to_vec(value)?;
        self.encrypt_bytes(&raw)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, envelope: &str) -> Result<T> {
        let raw = self.decrypt_bytes(envelope)?;
        serde_json::from_slice(&raw)
            .map_err(|e| AppError::Security(format!("decrypted payload failed to deserialize: {}", e)))
    }
}
