// API key issuance and verification.
//
// The plaintext key is returned exactly once; only its SHA-256 digest is
// storable. Verification compares digests in constant time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

const API_KEY_PREFIX: &str = "pg_";
const API_KEY_RANDOM_LEN: usize = 40;

/// Issued key material. `api_key` is the one-time plaintext; persist only
/// `hashed_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyData {
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub api_key: String,
    pub hashed_key: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub fn hash_api_key(plaintext: &str) -> String {
    BASE64.encode(Sha256::digest(plaintext.as_bytes()))
}

pub fn generate_api_key(user_id: Uuid, name: &str, permissions: Vec<String>) -> ApiKeyData {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    let api_key = format!("{}{}", API_KEY_PREFIX, random);
    let hashed_key = hash_api_key(&api_key);
    ApiKeyData {
        key_id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        api_key,
        hashed_key,
        permissions,
        created_at: Utc::now(),
    }
}

/// Constant-time verification of a presented key against the stored digest.
pub fn verify_api_key(plaintext: &str, stored_hash: &str) -> bool {
    let computed = hash_api_key(plaintext);
    if computed.len() != stored_hash.len() {
        return false;
    }
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_verify() {
        let data = generate_api_key(Uuid::new_v4(), "ci-bot", vec!["product:read".into()]);
        assert!(data.api_key.starts_with(API_KEY_PREFIX));
        assert_eq!(data.api_key.len(), API_KEY_PREFIX.len() + API_KEY_RANDOM_LEN);
        assert!(verify_api_key(&data.api_key, &data.hashed_key));
        assert!(!verify_api_key("pg_wrong", &data.hashed_key));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_api_key(Uuid::new_v4(), "a", Vec::new());
        let b = generate_api_key(Uuid::new_v4(), "b", Vec::new());
        assert_ne!(a.api_key, b.api_key);
        assert_ne!(a.hashed_key, b.hashed_key);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_api_key("pg_abc"), hash_api_key("pg_abc"));
        assert_ne!(hash_api_key("pg_abc"), hash_api_key("pg_abd"));
    }
}
