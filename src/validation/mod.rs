// # Validation Engine
//
// Composable named validators plus schema validation against typed record
// definitions. Rules are addressed by name (`email`, `range`, ...) so
// composite rule tables can be data-driven; the registry accepts additional
// validators at runtime.

pub mod validators;

pub use validators::PasswordRules;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AppError, FieldError, Result};

/// Outcome of applying one or more validators.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(loc: impl Into<String>, msg: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(loc, msg, code)],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }

    pub fn into_error(self, message: impl Into<String>) -> AppError {
        AppError::Validation {
            message: message.into(),
            errors: self.errors,
        }
    }
}

/// Runtime-registrable validator.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, params: &Value, loc: &str) -> ValidationResult;
}

/// Validators that must suspend (e.g. unique-in-store checks).
#[async_trait]
pub trait AsyncValidator: Send + Sync {
    async fn validate_async(&self, value: &Value, params: &Value, loc: &str) -> ValidationResult;
}

static CUSTOM_VALIDATORS: Lazy<RwLock<HashMap<String, Arc<dyn Validator>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Extend the rule factory at runtime. Registering an existing name replaces
/// the prior validator.
pub fn register_validator(name: &str, validator: Arc<dyn Validator>) {
    CUSTOM_VALIDATORS
        .write()
        .insert(name.to_string(), validator);
}

fn param_usize(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

fn param_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Apply a named rule to a single value. `params` is the rule's parameter
/// object (or `true` for parameterless rules).
pub fn apply_rule(rule: &str, value: &Value, params: &Value, loc: &str) -> ValidationResult {
    match rule {
        "required" => {
            if is_missing(value) {
                ValidationResult::fail(loc, "field is required", "value_error.missing")
            } else {
                ValidationResult::ok()
            }
        }
        // A missing optional value passes every non-required rule.
        _ if value.is_null() => ValidationResult::ok(),
        "email" => check(
            validators::validate_email(&value_as_string(value)),
            loc,
            "invalid email address",
            "value_error.email",
        ),
        "phone" => check(
            validators::validate_phone(&value_as_string(value)),
            loc,
            "invalid phone number",
            "value_error.phone",
        ),
        "date" => {
            let format = param_str(params, "format").unwrap_or("%Y-%m-%d");
            check(
                validators::validate_date(&value_as_string(value), format),
                loc,
                format!("invalid date, expected format {}", format),
                "value_error.date",
            )
        }
        "length" => check(
            validators::validate_length(
                &value_as_string(value),
                param_usize(params, "min"),
                param_usize(params, "max"),
            ),
            loc,
            "length out of bounds",
            "value_error.length",
        ),
        "range" => match value.as_f64() {
            Some(number) => check(
                validators::validate_range(
                    number,
                    param_f64(params, "min"),
                    param_f64(params, "max"),
                ),
                loc,
                "value out of range",
                "value_error.range",
            ),
            None => ValidationResult::fail(loc, "value is not numeric", "type_error.number"),
        },
        "regex" => {
            let pattern = param_str(params, "pattern").unwrap_or("");
            check(
                validators::validate_regex(&value_as_string(value), pattern),
                loc,
                "value does not match pattern",
                "value_error.regex",
            )
        }
        "url" => check(
            validators::validate_url(&value_as_string(value)),
            loc,
            "invalid URL",
            "value_error.url",
        ),
        "uuid" => check(
            validators::validate_uuid(&value_as_string(value)),
            loc,
            "invalid UUID",
            "value_error.uuid",
        ),
        "credit_card" => check(
            validators::validate_credit_card(&value_as_string(value)),
            loc,
            "invalid card number",
            "value_error.credit_card",
        ),
        "ip_address" => {
            let version = params.get("version").and_then(Value::as_u64).map(|v| v as u8);
            check(
                validators::validate_ip_address(&value_as_string(value), version),
                loc,
                "invalid IP address",
                "value_error.ip_address",
            )
        }
        "password" => {
            let rules = PasswordRules {
                min_length: param_usize(params, "min_length").unwrap_or(8),
                require_lowercase: params
                    .get("require_lowercase")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                require_uppercase: params
                    .get("require_uppercase")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                require_digit: params
                    .get("require_digit")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                require_special: params
                    .get("require_special")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            };
            let failures =
                validators::validate_password_strength(&value_as_string(value), &rules);
            let mut result = ValidationResult::ok();
            for failure in failures {
                result.merge(ValidationResult::fail(loc, failure, "value_error.password"));
            }
            result
        }
        "enum" => {
            let allowed = params
                .get("values")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            check(
                allowed.contains(value),
                loc,
                "value not in allowed set",
                "value_error.enum",
            )
        }
        other => {
            let custom = CUSTOM_VALIDATORS.read().get(other).cloned();
            match custom {
                Some(validator) => validator.validate(value, params, loc),
                None => ValidationResult::fail(
                    loc,
                    format!("unknown validation rule: {}", other),
                    "rule_error.unknown",
                ),
            }
        }
    }
}

fn check(
    ok: bool,
    loc: &str,
    msg: impl Into<String>,
    code: impl Into<String>,
) -> ValidationResult {
    if ok {
        ValidationResult::ok()
    } else {
        ValidationResult::fail(loc, msg, code)
    }
}

/// Validate a field table against a rules table:
/// `{field -> {rule-name -> params-or-true}}`. Within a field, `required`
/// runs first and short-circuits the remaining rules on failure.
pub fn validate_composite(
    data: &Map<String, Value>,
    rules: &HashMap<String, HashMap<String, Value>>,
) -> (bool, Vec<FieldError>) {
    let mut errors = Vec::new();
    for (field, field_rules) in rules {
        let value = data.get(field).cloned().unwrap_or(Value::Null);

        if field_rules.contains_key("required") {
            let result = apply_rule("required", &value, &Value::Bool(true), field);
            if !result.is_valid() {
                errors.extend(result.errors);
                continue;
            }
        }
        for (rule, params) in field_rules {
            if rule == "required" {
                continue;
            }
            let result = apply_rule(rule, &value, params, field);
            errors.extend(result.errors);
        }
    }
    (errors.is_empty(), errors)
}

/// Single-argument predicate for a fixed rule, for call sites that just want
/// a yes/no answer.
pub fn create_validator(rule: &str, params: Value) -> impl Fn(&Value) -> bool {
    let rule = rule.to_string();
    move |value: &Value| apply_rule(&rule, value, &params, "value").is_valid()
}

/// Schema validation: deserialize into the typed record, surfacing failures
/// as a structured validation error.
pub fn validate_data<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|err| AppError::Validation {
        message: "schema validation failed".to_string(),
        errors: vec![FieldError::new("body", err.to_string(), "type_error.schema")],
    })
}
