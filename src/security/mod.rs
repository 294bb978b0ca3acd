// # Security Core
//
// Token issuance/validation with a cache-backed blacklist, password hashing,
// API-key issuance, CSRF protection, field-level encryption, and input
// hardening.
//
// Cross-cutting collaborators (metrics, events) are best-effort: their
// absence degrades features, never correctness.

pub mod api_keys;
pub mod csrf;
pub mod encryption;
pub mod input;
pub mod passwords;
pub mod tokens;

pub use api_keys::{generate_api_key, hash_api_key, verify_api_key, ApiKeyData};
pub use csrf::CsrfProtection;
pub use encryption::EncryptionService;
pub use tokens::{TokenClaims, TokenManager, TokenPair, TokenType};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::metrics::MetricsService;
use crate::services::LifecycleService;
use crate::validation::validators::PasswordRules;
use crate::validation::ValidationResult;

/// Cache key prefix for revoked token ids.
pub const TOKEN_BLACKLIST_PREFIX: &str = "token:blacklist:";

pub struct SecurityService {
    tokens: TokenManager,
    pub encryption: Arc<EncryptionService>,
    pub csrf: CsrfProtection,
    cache: Arc<CacheManager>,
    events: Arc<EventBus>,
    metrics: RwLock<Option<Arc<MetricsService>>>,
    trusted_ips: RwLock<Vec<String>>,
    password_rules: PasswordRules,
}

impl SecurityService {
    pub fn new(settings: &Settings, cache: Arc<CacheManager>, events: Arc<EventBus>) -> Result<Self> {
        Ok(Self {
            tokens: TokenManager::new(
                settings.token_secret.expose(),
                settings.access_token_ttl_secs,
                settings.refresh_token_ttl_secs,
            ),
            encryption: Arc::new(EncryptionService::new(
                settings.encryption_master_key.expose(),
            )?),
            csrf: CsrfProtection::new(settings.token_secret.expose()),
            cache,
            events,
            metrics: RwLock::new(None),
            trusted_ips: RwLock::new(vec!["127.0.0.1".to_string(), "::1".to_string()]),
            password_rules: PasswordRules::default(),
        })
    }

    pub fn set_metrics(&self, metrics: Arc<MetricsService>) {
        *self.metrics.write() = Some(metrics);
    }

    pub fn set_trusted_ips(&self, ips: Vec<String>) {
        *self.trusted_ips.write() = ips;
    }

    fn blacklist_key(jti: &str) -> String {
        format!("{}{}", TOKEN_BLACKLIST_PREFIX, jti)
    }

    fn record_validation(&self, started: Instant, success: bool, error_type: &str) {
        if let Some(metrics) = self.metrics.read().clone() {
            let success_label = if success { "true" } else { "false" };
            metrics.registry().increment_counter(
                "token_validations_total",
                1.0,
                &[("success", success_label), ("error_type", error_type)],
            );
            metrics.registry().observe_histogram(
                "token_validation_duration_seconds",
                started.elapsed().as_secs_f64(),
                &[("success", success_label)],
            );
        }
    }

    // Token lifecycle

    /// Decode, verify signature and expiry, then consult the blacklist. A
    /// blacklisted `jti` is rejected immediately.
    pub async fn validate_token(&self, token: &str) -> Result<TokenClaims> {
        let started = Instant::now();
        let claims = match self.tokens.decode(token) {
            Ok(claims) => claims,
            Err(err) => {
                self.record_validation(started, false, "decode_error");
                return Err(err);
            }
        };

        match self.cache.get(&Self::blacklist_key(&claims.jti)).await {
            Ok(Some(flag)) if flag == "1" => {
                tracing::warn!(jti = %claims.jti, "blacklisted token presented");
                self.record_validation(started, false, "revoked");
                return Err(AppError::Authentication("Token has been revoked".into()));
            }
            Ok(_) => {}
            Err(err) => {
                // A cache outage must not lock every caller out.
                tracing::warn!(error = %err, "token blacklist check unavailable");
            }
        }

        self.record_validation(started, true, "none");
        Ok(claims)
    }

    pub async fn create_token_pair(
        &self,
        user_id: &str,
        role: &str,
        permissions: Vec<String>,
        user_data: Value,
    ) -> Result<TokenPair> {
        let pair = self
            .tokens
            .create_token_pair(user_id, role, permissions, user_data)?;
        if let Some(metrics) = self.metrics.read().clone() {
            metrics.registry().increment_counter(
                "tokens_created_total",
                1.0,
                &[("type", "token_pair"), ("role", role)],
            );
        }
        self.events
            .publish(
                "security.token_created",
                json!({"user_id": user_id, "token_type": "token_pair", "role": role}),
                None,
            )
            .await;
        Ok(pair)
    }

    /// Blacklist the token's `jti` for its remaining validity and publish
    /// `security.token_revoked`.
    pub async fn revoke_token(&self, token: &str, user_id: &str, reason: &str) -> Result<()> {
        let claims = self.validate_token(token).await?;
        let ttl = Duration::from_secs(claims.remaining_secs().max(1));
        self.cache
            .set(&Self::blacklist_key(&claims.jti), "1", Some(ttl))
            .await?;
        self.events
            .publish(
                "security.token_revoked",
                json!({"token_jti": claims.jti, "user_id": user_id, "reason": reason}),
                None,
            )
            .await;
        tracing::info!(jti = %claims.jti, user_id, reason, "token revoked");
        Ok(())
    }

    /// Rotate a refresh token: validate type, blacklist the old token, mint a
    /// new pair.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.validate_token(refresh_token).await?;
        if claims.token_type != TokenType::Refresh {
            return Err(AppError::Authentication("Invalid token type".into()));
        }
        let ttl = Duration::from_secs(claims.remaining_secs().max(1));
        self.cache
            .set(&Self::blacklist_key(&claims.jti), "1", Some(ttl))
            .await?;
        self.create_token_pair(
            &claims.sub,
            &claims.role,
            claims.permissions,
            claims.user_data,
        )
        .await
    }

    // Passwords

    pub fn hash_password(&self, password: &str) -> Result<String> {
        passwords::hash_password(password)
    }

    /// Constant-time verification. Failures bump a counter keyed by the
    /// truncated user id.
    pub fn verify_password(
        &self,
        password: &str,
        stored_hash: &str,
        user_id: Option<&str>,
    ) -> Result<bool> {
        let valid = passwords::verify_password(password, stored_hash)?;
        if !valid {
            if let Some(metrics) = self.metrics.read().clone() {
                let prefix: String = user_id.unwrap_or("unknown").chars().take(8).collect();
                metrics.registry().increment_counter(
                    "password_verifications_failed_total",
                    1.0,
                    &[("user_prefix", &prefix)],
                );
            }
        }
        Ok(valid)
    }

    pub fn validate_password_policy(
        &self,
        password: &str,
        history: Option<&[String]>,
    ) -> Result<ValidationResult> {
        passwords::validate_password_policy(password, &self.password_rules, history)
    }

    // API keys

    pub fn generate_api_key(
        &self,
        user_id: Uuid,
        name: &str,
        permissions: Vec<String>,
    ) -> ApiKeyData {
        api_keys::generate_api_key(user_id, name, permissions)
    }

    pub fn verify_api_key(&self, plaintext: &str, stored_hash: &str) -> bool {
        api_keys::verify_api_key(plaintext, stored_hash)
    }

    /// Random URL-safe token for one-off flows (password reset links,
    /// upload handles).
    pub fn generate_secure_token(&self, length: usize) -> String {
        use rand::distr::Alphanumeric;
        use rand::Rng;
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    // Input hardening

    pub fn is_trusted_ip(&self, ip: &str) -> bool {
        input::is_trusted_ip(ip, &self.trusted_ips.read())
    }

    pub fn detect_suspicious_content(&self, content: &str, component: &str) -> bool {
        let suspicious = input::detect_suspicious_content(content);
        if suspicious {
            if let Some(metrics) = self.metrics.read().clone() {
                metrics.registry().increment_counter(
                    "suspicious_content_total",
                    1.0,
                    &[("component", component)],
                );
            }
        }
        suspicious
    }

    pub fn sanitize_input(&self, content: &str) -> String {
        input::sanitize_html(content)
    }

    pub fn security_headers(&self) -> Vec<(&'static str, &'static str)> {
        input::security_headers()
    }
}

pub struct SecurityLifecycle(pub Arc<SecurityService>);

#[async_trait]
impl LifecycleService for SecurityLifecycle {
    fn service_name(&self) -> &str {
        "security"
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(
            active_key = %self.0.encryption.active_key_id(),
            "security service ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;

    fn service() -> SecurityService {
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        SecurityService::new(&Settings::default(), cache, Arc::new(EventBus::new())).unwrap()
    }

    #[tokio::test]
    async fn test_validate_token_pair() {
        let svc = service();
        let pair = svc
            .create_token_pair("u1", "member", vec!["product:read".into()], Value::Null)
            .await
            .unwrap();
        let claims = svc.validate_token(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let svc = service();
        let pair = svc
            .create_token_pair("u1", "member", Vec::new(), Value::Null)
            .await
            .unwrap();

        svc.revoke_token(&pair.access_token, "u1", "manual_logout")
            .await
            .unwrap();

        let err = svc.validate_token(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_blacklists() {
        let svc = service();
        let pair = svc
            .create_token_pair("u1", "member", Vec::new(), Value::Null)
            .await
            .unwrap();

        let new_pair = svc.refresh_tokens(&pair.refresh_token).await.unwrap();
        assert_ne!(new_pair.access_token, pair.access_token);

        // The old refresh token is now blacklisted.
        assert!(svc.refresh_tokens(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let svc = service();
        let pair = svc
            .create_token_pair("u1", "member", Vec::new(), Value::Null)
            .await
            .unwrap();
        let err = svc.refresh_tokens(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_password_round_trip_via_service() {
        let svc = service();
        let hash = svc.hash_password("Str0ng!pass").unwrap();
        assert!(svc.verify_password("Str0ng!pass", &hash, Some("u1")).unwrap());
        assert!(!svc.verify_password("nope", &hash, Some("u1")).unwrap());
    }
}
