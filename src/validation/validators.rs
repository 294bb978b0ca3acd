// Primitive named validators.
//
// Each primitive answers a yes/no question about a single value. Rule
// plumbing (error records, composite iteration, the runtime registry) lives
// in the module root.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9\s\-\(\)\.]{7,20}$").unwrap());

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());

pub fn validate_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn validate_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

pub fn validate_date(value: &str, format: &str) -> bool {
    NaiveDate::parse_from_str(value, format).is_ok()
}

pub fn validate_length(value: &str, min: Option<usize>, max: Option<usize>) -> bool {
    let len = value.chars().count();
    if let Some(min) = min {
        if len < min {
            return false;
        }
    }
    if let Some(max) = max {
        if len > max {
            return false;
        }
    }
    true
}

pub fn validate_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    if let Some(min) = min {
        if value < min {
            return false;
        }
    }
    if let Some(max) = max {
        if value > max {
            return false;
        }
    }
    true
}

pub fn validate_regex(value: &str, pattern: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

pub fn validate_url(value: &str) -> bool {
    URL_RE.is_match(value)
}

pub fn validate_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// Luhn check over 13-19 digits; spaces and dashes are tolerated.
pub fn validate_credit_card(value: &str) -> bool {
    let digits: Vec<u32> = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let mut sum = 0u32;
    for (i, digit) in digits.iter().rev().enumerate() {
        let mut d = *digit;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

pub fn validate_ip_address(value: &str, version: Option<u8>) -> bool {
    match value.parse::<std::net::IpAddr>() {
        Ok(addr) => match version {
            Some(4) => addr.is_ipv4(),
            Some(6) => addr.is_ipv6(),
            _ => true,
        },
        Err(_) => false,
    }
}

/// Password strength rules; every switch defaults on.
pub struct PasswordRules {
    pub min_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordRules {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

pub fn validate_password_strength(value: &str, rules: &PasswordRules) -> Vec<String> {
    let mut failures = Vec::new();
    if value.chars().count() < rules.min_length {
        failures.push(format!("must be at least {} characters", rules.min_length));
    }
    if rules.require_lowercase && !value.chars().any(|c| c.is_ascii_lowercase()) {
        failures.push("must contain a lowercase letter".to_string());
    }
    if rules.require_uppercase && !value.chars().any(|c| c.is_ascii_uppercase()) {
        failures.push("must contain an uppercase letter".to_string());
    }
    if rules.require_digit && !value.chars().any(|c| c.is_ascii_digit()) {
        failures.push("must contain a digit".to_string());
    }
    if rules.require_special && !value.chars().any(|c| !c.is_alphanumeric()) {
        failures.push("must contain a special character".to_string());
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("first.last+tag@sub.example.co"));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("user@"));
    }

    #[test]
    fn test_phone() {
        assert!(validate_phone("+1 (555) 123-4567"));
        assert!(validate_phone("5551234567"));
        assert!(!validate_phone("call me"));
    }

    #[test]
    fn test_date() {
        assert!(validate_date("2026-01-31", "%Y-%m-%d"));
        assert!(!validate_date("31/01/2026", "%Y-%m-%d"));
    }

    #[test]
    fn test_length_and_range() {
        assert!(validate_length("abcd", Some(2), Some(6)));
        assert!(!validate_length("a", Some(2), None));
        assert!(validate_range(5.0, Some(1.0), Some(10.0)));
        assert!(!validate_range(11.0, None, Some(10.0)));
    }

    #[test]
    fn test_uuid_and_url() {
        assert!(validate_uuid("a7f1b6ea-5a40-4a52-93d4-6f53732cd607"));
        assert!(!validate_uuid("xyz"));
        assert!(validate_url("https://example.com/path?q=1"));
        assert!(!validate_url("ftp://example.com"));
    }

    #[test]
    fn test_credit_card_luhn() {
        assert!(validate_credit_card("4539 1488 0343 6467"));
        assert!(!validate_credit_card("4539 1488 0343 6468"));
        assert!(!validate_credit_card("1234"));
    }

    #[test]
    fn test_ip_address() {
        assert!(validate_ip_address("192.168.1.1", None));
        assert!(validate_ip_address("::1", Some(6)));
        assert!(!validate_ip_address("::1", Some(4)));
        assert!(!validate_ip_address("999.0.0.1", None));
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Str0ng!pass", &PasswordRules::default()).is_empty());
        let failures = validate_password_strength("weak", &PasswordRules::default());
        assert!(failures.len() >= 3);
    }
}
