// CSRF token generation and validation.
//
// Token format is `<timestamp>:<hmac_b64>` where the MAC covers
// `<session_id>:<timestamp>`. Validation is constant-time and bounded by a
// freshness window. Failures log the session-id prefix only.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for CSRF tokens.
pub const CSRF_TOKEN_TTL_SECS: i64 = 3600;

pub struct CsrfProtection {
    secret: Vec<u8>,
    ttl_secs: i64,
}

fn session_prefix(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

impl CsrfProtection {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl_secs: CSRF_TOKEN_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn sign(&self, session_id: &str, timestamp: i64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}:{}", session_id, timestamp).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn generate_token(&self, session_id: &str) -> String {
        let timestamp = Utc::now().timestamp();
        let signature = self.sign(session_id, timestamp);
        format!("{}:{}", timestamp, BASE64.encode(signature))
    }

    pub fn validate_token(&self, token: &str, session_id: &str) -> bool {
        let Some((timestamp_raw, signature_b64)) = token.split_once(':') else {
            tracing::warn!(session = session_prefix(session_id), "malformed CSRF token");
            return false;
        };
        let Ok(timestamp) = timestamp_raw.parse::<i64>() else {
            tracing::warn!(session = session_prefix(session_id), "malformed CSRF token");
            return false;
        };
        let age = Utc::now().timestamp() - timestamp;
        if age < 0 || age > self.ttl_secs {
            tracing::warn!(session = session_prefix(session_id), "expired CSRF token");
            return false;
        }
        let Ok(signature) = BASE64.decode(signature_b64) else {
            tracing::warn!(session = session_prefix(session_id), "malformed CSRF token");
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(format!("{}:{}", session_id, timestamp).as_bytes());
        let valid = mac.verify_slice(&signature).is_ok();
        if !valid {
            tracing::warn!(session = session_prefix(session_id), "CSRF token mismatch");
        }
        valid
    }
}
