// Password hashing and policy validation.
//
// Argon2id with per-password salts. Verification is constant-time inside the
// verifier.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::{AppError, Result};
use crate::validation::validators::{validate_password_strength, PasswordRules};
use crate::validation::ValidationResult;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Security(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Security(format!("stored password hash is invalid: {}", e)))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AppError::Security(format!(
            "password verification failed: {}",
            e
        ))),
    }
}

/// Policy validation: strength rules plus an optional user-scoped history
/// check against previously used hashes.
pub fn validate_password_policy(
    password: &str,
    rules: &PasswordRules,
    history: Option<&[String]>,
) -> Result<ValidationResult> {
    let mut result = ValidationResult::ok();
    for failure in validate_password_strength(password, rules) {
        result.merge(ValidationResult::fail(
            "password",
            failure,
            "value_error.password",
        ));
    }
    if let Some(history) = history {
        for old_hash in history {
            if verify_password(password, old_hash)? {
                result.merge(ValidationResult::fail(
                    "password",
                    "must not match a previously used password",
                    "value_error.password.reused",
                ));
                break;
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("Str0ng!pass").unwrap();
        assert!(verify_password("Str0ng!pass", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("Str0ng!pass").unwrap();
        let b = hash_password("Str0ng!pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_stored_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_policy_with_history() {
        let old_hash = hash_password("Old!pass1").unwrap();
        let history = vec![old_hash];

        let reused =
            validate_password_policy("Old!pass1", &PasswordRules::default(), Some(&history))
                .unwrap();
        assert!(!reused.is_valid());
        assert_eq!(reused.errors[0].code, "value_error.password.reused");

        let fresh =
            validate_password_policy("New!pass2", &PasswordRules::default(), Some(&history))
                .unwrap();
        assert!(fresh.is_valid());
    }

    #[test]
    fn test_policy_strength_failures() {
        let weak = validate_password_policy("weak", &PasswordRules::default(), None).unwrap();
        assert!(!weak.is_valid());
    }
}
