// # Connectors
//
// Extraction from foreign systems. Every connector enforces the same
// read-only discipline: bare table names are wrapped into a `SELECT *` with
// a fetch limit and checked against the whitelist; full SQL is scanned for
// write verbs and rejected on match.

pub mod as400;
pub mod file;
pub mod filemaker;

pub use as400::{As400Connector, OdbcDriver, OdbcSession};
pub use file::{FileConnector, FileFormat};
pub use filemaker::FileMakerConnector;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::sync::model::SyncSource;

/// One extracted value. Decimals arrive as their own variant so connectors
/// can convert fixed-point to floating-point while leaving date/time values
/// intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Decimal(String),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Uuid(uuid::Uuid),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion is lenient: text values parse the way schema
    /// validation coerces strings from flat-file sources.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Decimal(s) | FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Decimal(s) | FieldValue::Text(s) => {
                s.trim().parse::<f64>().ok().map(|v| v as i64)
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            FieldValue::Uuid(v) => Some(*v),
            FieldValue::Text(s) => uuid::Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    /// Render for display/diagnostics.
    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) | FieldValue::Decimal(s) => s.clone(),
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Boolean(v) => v.to_string(),
            FieldValue::Date(v) => v.to_string(),
            FieldValue::Time(v) => v.to_string(),
            FieldValue::Timestamp(v) => v.to_string(),
            FieldValue::Uuid(v) => v.to_string(),
        }
    }
}

pub type RawRecord = HashMap<String, FieldValue>;

#[async_trait]
pub trait Connector: Send + Sync {
    fn source(&self) -> SyncSource;

    async fn connect(&mut self) -> Result<()>;

    /// Extract rows for a query or bare table name, bounded by `limit`.
    async fn extract(&mut self, query: &str, limit: Option<usize>) -> Result<Vec<RawRecord>>;

    async fn close(&mut self) -> Result<()>;
}

const WRITE_VERBS: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "RENAME",
];

/// Outcome of preparing a query for execution.
pub(crate) struct PreparedQuery {
    pub sql: String,
    /// Set when the input was a bare table name.
    pub table: Option<String>,
}

/// Validate and prepare a query. A bare identifier is wrapped as
/// `SELECT * FROM "<table>" FETCH FIRST <limit> ROWS ONLY` and must appear in
/// the whitelist when one is configured. Full SQL is scanned
/// case-insensitively for write verbs; a fetch limit is appended when absent.
pub(crate) fn validate_and_prepare_query(
    query: &str,
    limit: Option<usize>,
    allowed_tables: Option<&[String]>,
) -> Result<PreparedQuery> {
    let query = query.trim();
    if !query.contains(' ') {
        let table = query.to_string();
        if let Some(allowed) = allowed_tables {
            if !allowed.iter().any(|t| t == &table.to_ascii_uppercase()) {
                return Err(AppError::Security(format!(
                    "Access to table '{}' is not allowed",
                    table
                )));
            }
        }
        let limit_clause = limit
            .map(|n| format!(" FETCH FIRST {} ROWS ONLY", n))
            .unwrap_or_default();
        return Ok(PreparedQuery {
            sql: format!("SELECT * FROM \"{}\"{}", table, limit_clause),
            table: Some(table),
        });
    }

    let upper = query.to_ascii_uppercase();
    if WRITE_VERBS.iter().any(|verb| upper.contains(verb)) {
        return Err(AppError::Security(
            "Write operations are not allowed on read-only connections".into(),
        ));
    }

    let mut sql = query.trim_end_matches(';').to_string();
    if let Some(n) = limit {
        if !upper.contains("LIMIT") && !upper.contains("FETCH FIRST") {
            sql = format!("{} FETCH FIRST {} ROWS ONLY", sql, n);
        }
    }
    Ok(PreparedQuery { sql, table: None })
}

/// Convert fixed-point decimals to floats; everything else passes through.
pub(crate) fn convert_row_types(mut record: RawRecord) -> RawRecord {
    for value in record.values_mut() {
        if let FieldValue::Decimal(raw) = value {
            if let Ok(parsed) = raw.trim().parse::<f64>() {
                *value = FieldValue::Float(parsed);
            }
        }
    }
    record
}
