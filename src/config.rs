// # Runtime Configuration
//
// Environment-driven settings for the platform core. Mandatory values are a
// fatal `Configuration` error at startup; optional values fall back to
// development defaults so the crate runs self-contained in tests.

use std::env;
use std::fmt;

use crate::error::{AppError, Result};

/// Wrapper for credential material. `Debug` and `Display` both redact.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Deliberate access to the underlying value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// AS400/iSeries connection settings (read-only account).
#[derive(Debug, Clone)]
pub struct As400Settings {
    pub dsn: String,
    pub username: String,
    pub password: Secret,
    pub database: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub ssl: bool,
    /// Whitelist of allowed tables, uppercased.
    pub allowed_tables: Option<Vec<String>>,
    /// Whitelist of allowed schemas/libraries, uppercased.
    pub allowed_schemas: Option<Vec<String>>,
    pub connection_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub sync_enabled: bool,
}

impl Default for As400Settings {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            username: String::new(),
            password: Secret::new(""),
            database: String::new(),
            server: None,
            port: None,
            ssl: true,
            allowed_tables: None,
            allowed_schemas: None,
            connection_timeout_secs: 30,
            query_timeout_secs: 60,
            sync_enabled: false,
        }
    }
}

impl As400Settings {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("AS400_PORT") {
            Ok(raw) => Some(raw.parse::<u16>().map_err(|_| {
                AppError::Configuration(format!("AS400_PORT is not a valid port: {}", raw))
            })?),
            Err(_) => None,
        };
        Ok(Self {
            dsn: env::var("AS400_DSN").unwrap_or_default(),
            username: env::var("AS400_USERNAME").unwrap_or_default(),
            password: Secret::new(env::var("AS400_PASSWORD").unwrap_or_default()),
            database: env::var("AS400_DATABASE").unwrap_or_default(),
            server: env::var("AS400_SERVER").ok(),
            port,
            ssl: env_flag("AS400_SSL", true),
            allowed_tables: env_list("AS400_ALLOWED_TABLES"),
            allowed_schemas: env_list("AS400_ALLOWED_SCHEMAS"),
            connection_timeout_secs: env_u64("AS400_CONNECTION_TIMEOUT", 30),
            query_timeout_secs: env_u64("AS400_QUERY_TIMEOUT", 60),
            sync_enabled: env_flag("AS400_SYNC_ENABLED", false),
        })
    }
}

/// FileMaker connection settings. Same whitelist discipline as AS400.
#[derive(Debug, Clone)]
pub struct FileMakerSettings {
    pub server: String,
    pub username: String,
    pub password: Secret,
    pub database: String,
    pub port: Option<u16>,
    pub ssl: bool,
    pub allowed_tables: Option<Vec<String>>,
    pub connection_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for FileMakerSettings {
    fn default() -> Self {
        Self {
            server: String::new(),
            username: String::new(),
            password: Secret::new(""),
            database: String::new(),
            port: None,
            ssl: true,
            allowed_tables: None,
            connection_timeout_secs: 30,
            query_timeout_secs: 60,
        }
    }
}

impl FileMakerSettings {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("FILEMAKER_PORT") {
            Ok(raw) => Some(raw.parse::<u16>().map_err(|_| {
                AppError::Configuration(format!("FILEMAKER_PORT is not a valid port: {}", raw))
            })?),
            Err(_) => None,
        };
        Ok(Self {
            server: env::var("FILEMAKER_SERVER").unwrap_or_default(),
            username: env::var("FILEMAKER_USERNAME").unwrap_or_default(),
            password: Secret::new(env::var("FILEMAKER_PASSWORD").unwrap_or_default()),
            database: env::var("FILEMAKER_DATABASE").unwrap_or_default(),
            port,
            ssl: env_flag("FILEMAKER_SSL", true),
            allowed_tables: env_list("FILEMAKER_ALLOWED_TABLES"),
            connection_timeout_secs: env_u64("FILEMAKER_CONNECTION_TIMEOUT", 30),
            query_timeout_secs: env_u64("FILEMAKER_QUERY_TIMEOUT", 60),
        })
    }
}

/// Top-level settings for the platform core.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub metrics_namespace: String,
    pub metrics_subsystem: String,
    /// Base64-encoded 32-byte master key for the encryption envelope.
    pub encryption_master_key: Secret,
    pub token_secret: Secret,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub log_dir: String,
    pub sync_interval_secs: u64,
    pub sync_batch_size: usize,
    pub as400: As400Settings,
    pub filemaker: FileMakerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            service_name: "partgrid".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            server_port: 8000,
            database_url: "postgresql://localhost/partgrid".to_string(),
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            metrics_namespace: "partgrid".to_string(),
            metrics_subsystem: "core".to_string(),
            // Development-only key; production must set ENCRYPTION_MASTER_KEY.
            encryption_master_key: Secret::new("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            token_secret: Secret::new("development-token-secret"),
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 7 * 86400,
            log_dir: "./logs".to_string(),
            sync_interval_secs: 86400,
            sync_batch_size: 1000,
            as400: As400Settings::default(),
            filemaker: FileMakerSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();
        let environment =
            Environment::parse(&env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()));

        let encryption_master_key = match env::var("ENCRYPTION_MASTER_KEY") {
            Ok(key) => Secret::new(key),
            Err(_) if environment.is_development() => defaults.encryption_master_key.clone(),
            Err(_) => {
                return Err(AppError::Configuration(
                    "ENCRYPTION_MASTER_KEY must be set outside development".to_string(),
                ))
            }
        };
        let token_secret = match env::var("TOKEN_SECRET") {
            Ok(key) => Secret::new(key),
            Err(_) if environment.is_development() => defaults.token_secret.clone(),
            Err(_) => {
                return Err(AppError::Configuration(
                    "TOKEN_SECRET must be set outside development".to_string(),
                ))
            }
        };

        Ok(Self {
            environment,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: defaults.service_version,
            server_port: env_u64("SERVER_PORT", 8000) as u16,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            metrics_namespace: env::var("METRICS_NAMESPACE").unwrap_or(defaults.metrics_namespace),
            metrics_subsystem: env::var("METRICS_SUBSYSTEM").unwrap_or(defaults.metrics_subsystem),
            encryption_master_key,
            token_secret,
            access_token_ttl_secs: env_u64("ACCESS_TOKEN_TTL", 900),
            refresh_token_ttl_secs: env_u64("REFRESH_TOKEN_TTL", 7 * 86400),
            log_dir: env::var("LOG_DIR").unwrap_or(defaults.log_dir),
            sync_interval_secs: env_u64("SYNC_INTERVAL", 86400),
            sync_batch_size: env_u64("SYNC_BATCH_SIZE", 1000) as usize,
            as400: As400Settings::from_env()?,
            filemaker: FileMakerSettings::from_env()?,
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, uppercased for whitelist comparison.
fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|item| item.trim().to_ascii_uppercase())
            .filter(|item| !item.is_empty())
            .collect()
    })
}
