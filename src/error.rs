use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Location of the offending field (e.g. `body.email`)
    pub loc: String,
    /// Human-readable message
    pub msg: String,
    /// Stable machine-readable code (e.g. `value_error.missing`)
    pub code: String,
}

impl FieldError {
    pub fn new(loc: impl Into<String>, msg: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            msg: msg.into(),
            code: code.into(),
        }
    }
}

/// Per-record failure inside a sync batch. Indices refer to the position in
/// the full extract, not the chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub index: usize,
    pub key: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn new(index: usize, key: Option<String>, message: impl Into<String>) -> Self {
        Self {
            index,
            key,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{resource_type} not found: {resource_id}")]
    NotFound {
        resource_type: String,
        resource_id: String,
    },

    #[error("Business rule violation: {message}")]
    BusinessRule { message: String, code: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        limit: u32,
        remaining: u32,
        reset_seconds: u64,
    },

    #[error("Security error: {0}")]
    Security(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a validation error without field details.
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        AppError::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn business(message: impl Into<String>, code: impl Into<String>) -> Self {
        AppError::BusinessRule {
            message: message.into(),
            code: code.into(),
        }
    }

    /// HTTP status the error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 422,
            AppError::Authentication(_) => 401,
            AppError::PermissionDenied(_) => 403,
            AppError::NotFound { .. } => 404,
            AppError::BusinessRule { .. } => 400,
            AppError::RateLimit { .. } => 429,
            AppError::Security(_) => 403,
            AppError::Database(_) => 500,
            AppError::Configuration(_) => 500,
            AppError::Network(_) => 502,
            AppError::Unavailable(_) | AppError::CircuitOpen(_) => 503,
            AppError::Serialization(_) => 500,
            AppError::Io(_) => 500,
            AppError::Internal(_) => 500,
        }
    }

    /// Whether retry utilities may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::Unavailable(_) | AppError::Database(_) | AppError::Io(_)
        )
    }

    /// Rate-limit headers when applicable (`X-RateLimit-Limit/Remaining/Reset`).
    pub fn rate_limit_headers(&self) -> Option<Vec<(String, String)>> {
        match self {
            AppError::RateLimit {
                limit,
                remaining,
                reset_seconds,
                ..
            } => Some(vec![
                ("X-RateLimit-Limit".to_string(), limit.to_string()),
                ("X-RateLimit-Remaining".to_string(), remaining.to_string()),
                ("X-RateLimit-Reset".to_string(), reset_seconds.to_string()),
            ]),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::validation("bad").status_code(), 422);
        assert_eq!(AppError::Authentication("no".into()).status_code(), 401);
        assert_eq!(AppError::PermissionDenied("no".into()).status_code(), 403);
        assert_eq!(AppError::not_found("ChatRoom", "abc").status_code(), 404);
        assert_eq!(
            AppError::RateLimit {
                message: "slow down".into(),
                limit: 10,
                remaining: 0,
                reset_seconds: 42,
            }
            .status_code(),
            429
        );
    }

    #[test]
    fn test_rate_limit_headers() {
        let err = AppError::RateLimit {
            message: "slow down".into(),
            limit: 10,
            remaining: 0,
            reset_seconds: 42,
        };
        let headers = err.rate_limit_headers().unwrap();
        assert_eq!(headers[0], ("X-RateLimit-Limit".to_string(), "10".to_string()));
        assert_eq!(headers[2].1, "42");
        assert!(AppError::validation("x").rate_limit_headers().is_none());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Network("timeout".into()).is_retryable());
        assert!(AppError::Database("deadlock".into()).is_retryable());
        assert!(!AppError::PermissionDenied("no".into()).is_retryable());
        assert!(!AppError::validation("x").is_retryable());
    }
}
