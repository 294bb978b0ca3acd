// JWT issuance and validation.

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Reset,
}

/// Typed claims carried by every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id.
    pub sub: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Unique token id, the blacklist handle.
    pub jti: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Opaque caller-supplied bag.
    #[serde(default)]
    pub user_data: Value,
}

impl TokenClaims {
    /// Remaining validity in whole seconds, clamped at zero.
    pub fn remaining_secs(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenManager {
    secret: String,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenManager {
    pub fn new(secret: impl Into<String>, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    fn issue(
        &self,
        user_id: &str,
        role: &str,
        permissions: Vec<String>,
        user_data: Value,
        token_type: TokenType,
        ttl_secs: u64,
    ) -> Result<String> {
        let iat = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            permissions,
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat + ttl_secs as i64,
            user_data,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token encoding failed: {}", e)))
    }

    pub fn create_token_pair(
        &self,
        user_id: &str,
        role: &str,
        permissions: Vec<String>,
        user_data: Value,
    ) -> Result<TokenPair> {
        let access_token = self.issue(
            user_id,
            role,
            permissions.clone(),
            user_data.clone(),
            TokenType::Access,
            self.access_ttl_secs,
        )?;
        let refresh_token = self.issue(
            user_id,
            role,
            permissions,
            user_data,
            TokenType::Refresh,
            self.refresh_ttl_secs,
        )?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Decode and verify signature and expiry.
    pub fn decode(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => AppError::Authentication("Token has expired".into()),
            ErrorKind::InvalidSignature => AppError::Security("Token signature mismatch".into()),
            _ => AppError::Authentication("Invalid token".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> TokenManager {
        TokenManager::new("unit-test-secret", 900, 86400)
    }

    #[test]
    fn test_token_pair_round_trip() {
        let m = manager();
        let pair = m
            .create_token_pair(
                "user-1",
                "member",
                vec!["product:read".into()],
                json!({"company": "acme"}),
            )
            .unwrap();

        let access = m.decode(&pair.access_token).unwrap();
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.role, "member");
        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(access.user_data["company"], "acme");

        let refresh = m.decode(&pair.refresh_token).unwrap();
        assert_eq!(refresh.token_type, TokenType::Refresh);
        assert_ne!(access.jti, refresh.jti);
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let m = manager();
        let pair = m
            .create_token_pair("user-1", "member", Vec::new(), Value::Null)
            .unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.pop();
        assert!(m.decode(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let pair = manager()
            .create_token_pair("user-1", "member", Vec::new(), Value::Null)
            .unwrap();
        let other = TokenManager::new("different-secret", 900, 86400);
        assert!(other.decode(&pair.access_token).is_err());
    }

    #[test]
    fn test_remaining_secs() {
        let m = manager();
        let pair = m
            .create_token_pair("user-1", "member", Vec::new(), Value::Null)
            .unwrap();
        let claims = m.decode(&pair.access_token).unwrap();
        assert!(claims.remaining_secs() > 0);
        assert!(claims.remaining_secs() <= 900);
    }
}
