// Sync engine records: history rows, events, and the shared enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncEntityKind {
    Product,
    Measurement,
    Stock,
    Pricing,
    Manufacturer,
    Customer,
    Order,
}

impl SyncEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntityKind::Product => "product",
            SyncEntityKind::Measurement => "measurement",
            SyncEntityKind::Stock => "stock",
            SyncEntityKind::Pricing => "pricing",
            SyncEntityKind::Manufacturer => "manufacturer",
            SyncEntityKind::Customer => "customer",
            SyncEntityKind::Order => "order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "product" | "products" => Some(SyncEntityKind::Product),
            "measurement" | "measurements" => Some(SyncEntityKind::Measurement),
            "stock" | "inventory" => Some(SyncEntityKind::Stock),
            "pricing" | "prices" => Some(SyncEntityKind::Pricing),
            "manufacturer" => Some(SyncEntityKind::Manufacturer),
            "customer" => Some(SyncEntityKind::Customer),
            "order" => Some(SyncEntityKind::Order),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    As400,
    Filemaker,
    File,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::As400 => "as400",
            SyncSource::Filemaker => "filemaker",
            SyncSource::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "as400" => Some(SyncSource::As400),
            "filemaker" => Some(SyncSource::Filemaker),
            "file" | "csv" | "json" => Some(SyncSource::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    /// Terminal statuses are write-once.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

/// Audit record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncHistoryRecord {
    pub id: Uuid,
    pub entity_kind: SyncEntityKind,
    pub source: SyncSource,
    pub status: SyncStatus,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived: completed_at - started_at, in seconds.
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub details: Value,
    pub triggered_by: Option<Uuid>,
    pub parent_id: Option<Uuid>,
}

/// Append-only milestone row attached to a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEventRecord {
    pub id: Uuid,
    pub sync_id: Uuid,
    pub event_kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// Rolling statistics over a lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStats {
    pub period_days: i64,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub success_rate: f64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub average_duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Pending.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(SyncEntityKind::parse("Products"), Some(SyncEntityKind::Product));
        assert_eq!(SyncEntityKind::parse("inventory"), Some(SyncEntityKind::Stock));
        assert_eq!(SyncEntityKind::parse("widgets"), None);
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(SyncSource::parse("AS400"), Some(SyncSource::As400));
        assert_eq!(SyncSource::parse("csv"), Some(SyncSource::File));
        assert_eq!(SyncSource::parse("ftp"), None);
    }
}
