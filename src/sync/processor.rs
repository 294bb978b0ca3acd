// Typed transform-and-validate processors.
//
// A processor turns raw connector records into typed destination records:
// defaults first, then per-field conversions inferred from the source field
// name, then an entity-specific transform hook, then required-field and
// duplicate-key enforcement. Validation constructs the typed record and
// collects per-record failures without aborting the batch.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{AppError, RecordError, Result};
use crate::sync::connectors::{FieldValue, RawRecord};

pub type ProcessedRecord = HashMap<String, FieldValue>;

/// Entity-specific transform applied after the generic field conversions.
pub type TransformHook = Box<dyn Fn(&mut ProcessedRecord) -> Result<()> + Send + Sync>;

/// A typed destination record constructible from a processed record.
pub trait DestinationRecord: Sized + Send {
    fn from_processed(record: &ProcessedRecord) -> Result<Self>;
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// destination field -> source field
    pub field_mapping: HashMap<String, String>,
    pub boolean_true_values: Vec<String>,
    pub boolean_false_values: Vec<String>,
    pub default_values: HashMap<String, FieldValue>,
    pub skip_fields: Vec<String>,
    pub required_fields: Vec<String>,
    pub date_format: String,
    pub time_format: String,
    pub timestamp_format: String,
    /// Enables duplicate detection within a processed batch.
    pub unique_key_field: Option<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            field_mapping: HashMap::new(),
            boolean_true_values: ["1", "Y", "YES", "TRUE", "T"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            boolean_false_values: ["0", "N", "NO", "FALSE", "F"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_values: HashMap::new(),
            skip_fields: Vec::new(),
            required_fields: Vec::new(),
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S".to_string(),
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            unique_key_field: None,
        }
    }
}

const DATE_FALLBACKS: [&str; 3] = ["%Y%m%d", "%m/%d/%Y", "%d/%m/%Y"];
const TIME_FALLBACKS: [&str; 3] = ["%H%M%S", "%I:%M:%S %p", "%H:%M"];
const TIMESTAMP_FALLBACKS: [&str; 3] = ["%Y%m%d%H%M%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %I:%M:%S %p"];

static NUMERIC_CLEAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.\-]").unwrap());

pub struct Processor<T: DestinationRecord> {
    config: ProcessorConfig,
    /// source field -> destination field (inverted from config)
    source_to_dest: HashMap<String, String>,
    transform: TransformHook,
    seen_keys: Mutex<HashSet<String>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DestinationRecord> Processor<T> {
    pub fn new(config: ProcessorConfig, transform: TransformHook) -> Self {
        let source_to_dest = config
            .field_mapping
            .iter()
            .map(|(dest, source)| (source.clone(), dest.clone()))
            .collect();
        Self {
            config,
            source_to_dest,
            transform,
            seen_keys: Mutex::new(HashSet::new()),
            _marker: PhantomData,
        }
    }

    pub fn without_transform(config: ProcessorConfig) -> Self {
        Self::new(config, Box::new(|_| Ok(())))
    }

    /// Transform a batch. Per-record failures are collected, never raised;
    /// indices in the error list are offset by `base_index` so they refer to
    /// the position in the full extract.
    pub async fn process(
        &self,
        records: &[RawRecord],
        base_index: usize,
    ) -> (Vec<ProcessedRecord>, Vec<RecordError>) {
        let mut processed = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        self.seen_keys.lock().clear();

        for (offset, record) in records.iter().enumerate() {
            let index = base_index + offset;
            match self.process_record(record) {
                Ok(item) => {
                    if let Some(key_field) = &self.config.unique_key_field {
                        if let Some(key) = item.get(key_field).map(FieldValue::display) {
                            if !key.is_empty() {
                                let mut seen = self.seen_keys.lock();
                                if !seen.insert(key.clone()) {
                                    tracing::warn!(key = %key, "duplicate key in batch");
                                    errors.push(RecordError::new(
                                        index,
                                        Some(key),
                                        "Duplicate key",
                                    ));
                                    continue;
                                }
                            }
                        }
                    }
                    processed.push(item);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "error processing record");
                    errors.push(RecordError::new(index, None, err.to_string()));
                }
            }
        }

        if errors.is_empty() {
            tracing::info!(records = processed.len(), "processed records");
        } else {
            tracing::warn!(
                records = processed.len(),
                errors = errors.len(),
                "processed records with errors"
            );
        }
        (processed, errors)
    }

    /// Construct typed records. If every record fails, the whole batch is a
    /// validation error aggregating all details.
    pub async fn validate(
        &self,
        records: Vec<ProcessedRecord>,
        base_index: usize,
    ) -> Result<(Vec<T>, Vec<RecordError>)> {
        let total = records.len();
        let mut validated = Vec::with_capacity(total);
        let mut errors = Vec::new();

        for (offset, record) in records.into_iter().enumerate() {
            let index = base_index + offset;
            match T::from_processed(&record) {
                Ok(item) => validated.push(item),
                Err(err) => {
                    let key = self
                        .config
                        .unique_key_field
                        .as_ref()
                        .and_then(|field| record.get(field))
                        .map(FieldValue::display);
                    tracing::warn!(index, error = %err, "validation error");
                    errors.push(RecordError::new(index, key, err.to_string()));
                }
            }
        }

        if !errors.is_empty() && errors.len() >= total && total > 0 {
            return Err(AppError::Validation {
                message: "All records failed validation".to_string(),
                errors: errors
                    .iter()
                    .map(|e| {
                        crate::error::FieldError::new(
                            format!("records[{}]", e.index),
                            e.message.clone(),
                            "value_error.record",
                        )
                    })
                    .collect(),
            });
        }
        Ok((validated, errors))
    }

    fn process_record(&self, record: &RawRecord) -> Result<ProcessedRecord> {
        let mut processed = self.config.default_values.clone();

        for (source_field, value) in record {
            if self.config.skip_fields.iter().any(|f| f == source_field) {
                continue;
            }
            let dest_field = self
                .source_to_dest
                .get(source_field)
                .cloned()
                .unwrap_or_else(|| source_field.clone());
            let converted = self.convert_field(source_field, value.clone());
            processed.insert(dest_field, converted);
        }

        (self.transform)(&mut processed)?;

        for field in &self.config.required_fields {
            let missing = processed.get(field).map(FieldValue::is_null).unwrap_or(true);
            if missing {
                return Err(AppError::validation(format!(
                    "Missing required field: {}",
                    field
                )));
            }
        }
        Ok(processed)
    }

    /// Field-kind conversion inferred from the source field name.
    fn convert_field(&self, name: &str, value: FieldValue) -> FieldValue {
        if value.is_null() {
            return FieldValue::Null;
        }

        if name.starts_with("IS_")
            || name.starts_with("HAS_")
            || name.ends_with("_FLAG")
            || name.ends_with("_YN")
            || name.ends_with("_INDICATOR")
        {
            return FieldValue::Boolean(self.to_boolean(&value));
        }
        if name.ends_with("_DATE") || name.ends_with("_DT") {
            return self.to_date(&value);
        }
        if name.ends_with("_TIME") || name.ends_with("_TM") {
            return self.to_time(&value);
        }
        if name.ends_with("_TIMESTAMP") || name.ends_with("_TS") {
            return self.to_timestamp(&value);
        }
        if name.ends_with("_QTY")
            || name.ends_with("_AMOUNT")
            || name.ends_with("_AMT")
            || name.ends_with("_NUM")
            || name.ends_with("_PRICE")
        {
            return self.to_numeric(&value);
        }

        match value {
            FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
            other => other,
        }
    }

    fn to_boolean(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Boolean(b) => *b,
            FieldValue::Null => false,
            FieldValue::Integer(i) => *i != 0,
            FieldValue::Float(f) => *f != 0.0,
            other => {
                let normalized = other.display().trim().to_ascii_uppercase();
                if self.config.boolean_true_values.contains(&normalized) {
                    true
                } else if self.config.boolean_false_values.contains(&normalized) {
                    false
                } else {
                    // Unrecognized tokens default to false.
                    false
                }
            }
        }
    }

    fn to_date(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Date(_) | FieldValue::Timestamp(_) => value.clone(),
            FieldValue::Text(raw) => {
                let raw = raw.trim();
                if raw.is_empty() || raw == "0000-00-00" || raw == "00/00/0000" {
                    return FieldValue::Null;
                }
                if let Ok(date) = NaiveDate::parse_from_str(raw, &self.config.date_format) {
                    return FieldValue::Date(date);
                }
                for format in DATE_FALLBACKS {
                    if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                        return FieldValue::Date(date);
                    }
                }
                tracing::warn!(value = raw, "could not parse date value");
                FieldValue::Null
            }
            _ => FieldValue::Null,
        }
    }

    fn to_time(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Time(_) | FieldValue::Timestamp(_) => value.clone(),
            FieldValue::Text(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return FieldValue::Null;
                }
                if let Ok(time) = NaiveTime::parse_from_str(raw, &self.config.time_format) {
                    return FieldValue::Time(time);
                }
                for format in TIME_FALLBACKS {
                    if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
                        return FieldValue::Time(time);
                    }
                }
                tracing::warn!(value = raw, "could not parse time value");
                FieldValue::Null
            }
            _ => FieldValue::Null,
        }
    }

    fn to_timestamp(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Timestamp(_) => value.clone(),
            FieldValue::Text(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return FieldValue::Null;
                }
                if let Ok(ts) = NaiveDateTime::parse_from_str(raw, &self.config.timestamp_format) {
                    return FieldValue::Timestamp(ts);
                }
                for format in TIMESTAMP_FALLBACKS {
                    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
                        return FieldValue::Timestamp(ts);
                    }
                }
                tracing::warn!(value = raw, "could not parse timestamp value");
                FieldValue::Null
            }
            _ => FieldValue::Null,
        }
    }

    fn to_numeric(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Integer(_) | FieldValue::Float(_) => value.clone(),
            FieldValue::Null => FieldValue::Null,
            other => {
                let raw = other.display();
                let cleaned = NUMERIC_CLEAN.replace_all(raw.trim(), "").to_string();
                if cleaned.is_empty() || matches!(cleaned.as_str(), "." | "-" | ".-" | "-.") {
                    return FieldValue::Null;
                }
                match cleaned.parse::<f64>() {
                    Ok(parsed) if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 => {
                        FieldValue::Integer(parsed as i64)
                    }
                    Ok(parsed) => FieldValue::Float(parsed),
                    Err(_) => {
                        tracing::warn!(value = %raw, "could not convert to numeric");
                        FieldValue::Null
                    }
                }
            }
        }
    }
}

/// Normalized part number: alphanumeric characters only, uppercased.
pub fn normalize_part_number(part_number: &str) -> String {
    part_number
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

/// Product transform: derive `part_number_stripped` when absent.
pub fn product_transform() -> TransformHook {
    Box::new(|record| {
        if !record.contains_key("part_number_stripped") {
            if let Some(FieldValue::Text(part_number)) = record.get("part_number") {
                let stripped = normalize_part_number(part_number);
                record.insert("part_number_stripped".into(), FieldValue::Text(stripped));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PartRecord {
        part_number: String,
        active: bool,
    }

    impl DestinationRecord for PartRecord {
        fn from_processed(record: &ProcessedRecord) -> Result<Self> {
            let part_number = record
                .get("part_number")
                .and_then(FieldValue::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::validation("part_number is required"))?
                .to_string();
            let active = record
                .get("is_active")
                .and_then(FieldValue::as_bool)
                .unwrap_or(true);
            Ok(Self {
                part_number,
                active,
            })
        }
    }

    fn config() -> ProcessorConfig {
        let mut field_mapping = HashMap::new();
        field_mapping.insert("part_number".to_string(), "PRDNUM".to_string());
        field_mapping.insert("is_active".to_string(), "IS_ACTIVE".to_string());
        ProcessorConfig {
            field_mapping,
            required_fields: vec!["part_number".to_string()],
            unique_key_field: Some("part_number".to_string()),
            ..ProcessorConfig::default()
        }
    }

    fn raw(part: &str, active: &str) -> RawRecord {
        let mut record = RawRecord::new();
        record.insert("PRDNUM".into(), FieldValue::Text(part.to_string()));
        record.insert("IS_ACTIVE".into(), FieldValue::Text(active.to_string()));
        record
    }

    #[tokio::test]
    async fn test_mapping_and_boolean_inference() {
        let processor: Processor<PartRecord> = Processor::new(config(), product_transform());
        let (processed, errors) = processor.process(&[raw(" AB-123 ", "Y")], 0).await;
        assert!(errors.is_empty());
        assert_eq!(
            processed[0]["part_number"],
            FieldValue::Text("AB-123".into())
        );
        assert_eq!(processed[0]["is_active"], FieldValue::Boolean(true));
        assert_eq!(
            processed[0]["part_number_stripped"],
            FieldValue::Text("AB123".into())
        );
    }

    #[tokio::test]
    async fn test_duplicate_keys_skipped_with_warning() {
        let processor: Processor<PartRecord> = Processor::new(config(), product_transform());
        let batch = vec![raw("AB-123", "Y"), raw("AB-123", "N"), raw("CD-456", "Y")];
        let (processed, errors) = processor.process(&batch, 10).await;
        assert_eq!(processed.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 11);
        assert_eq!(errors[0].message, "Duplicate key");
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let processor: Processor<PartRecord> = Processor::new(config(), product_transform());
        let mut record = RawRecord::new();
        record.insert("IS_ACTIVE".into(), FieldValue::Text("Y".into()));
        let (processed, errors) = processor.process(&[record], 0).await;
        assert!(processed.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("part_number"));
    }

    #[tokio::test]
    async fn test_date_parsing_fallbacks() {
        let processor: Processor<PartRecord> = Processor::without_transform(config());
        for raw_date in ["2026-01-31", "20260131", "01/31/2026"] {
            let mut record = RawRecord::new();
            record.insert("PRDNUM".into(), FieldValue::Text("X".into()));
            record.insert("SHIP_DATE".into(), FieldValue::Text(raw_date.into()));
            let (processed, _) = processor.process(&[record], 0).await;
            assert!(
                matches!(processed[0]["SHIP_DATE"], FieldValue::Date(_)),
                "failed for {}",
                raw_date
            );
        }

        let mut record = RawRecord::new();
        record.insert("PRDNUM".into(), FieldValue::Text("X".into()));
        record.insert("SHIP_DATE".into(), FieldValue::Text("not a date".into()));
        let (processed, _) = processor.process(&[record], 0).await;
        assert_eq!(processed[0]["SHIP_DATE"], FieldValue::Null);
    }

    #[tokio::test]
    async fn test_zero_dates_are_null() {
        let processor: Processor<PartRecord> = Processor::without_transform(config());
        let mut record = RawRecord::new();
        record.insert("PRDNUM".into(), FieldValue::Text("X".into()));
        record.insert("SHIP_DATE".into(), FieldValue::Text("0000-00-00".into()));
        let (processed, _) = processor.process(&[record], 0).await;
        assert_eq!(processed[0]["SHIP_DATE"], FieldValue::Null);
    }

    #[tokio::test]
    async fn test_numeric_cleaning() {
        let processor: Processor<PartRecord> = Processor::without_transform(config());
        let mut record = RawRecord::new();
        record.insert("PRDNUM".into(), FieldValue::Text("X".into()));
        record.insert("LIST_PRICE".into(), FieldValue::Text("$1,234.50".into()));
        record.insert("ON_HAND_QTY".into(), FieldValue::Text("42".into()));
        record.insert("BAD_AMT".into(), FieldValue::Text("n/a".into()));

        let (processed, _) = processor.process(&[record], 0).await;
        assert_eq!(processed[0]["LIST_PRICE"], FieldValue::Float(1234.5));
        assert_eq!(processed[0]["ON_HAND_QTY"], FieldValue::Integer(42));
        assert_eq!(processed[0]["BAD_AMT"], FieldValue::Null);
    }

    #[tokio::test]
    async fn test_validate_collects_errors_but_continues() {
        let processor: Processor<PartRecord> = Processor::without_transform(config());
        let mut good = ProcessedRecord::new();
        good.insert("part_number".into(), FieldValue::Text("AB".into()));
        let mut bad = ProcessedRecord::new();
        bad.insert("part_number".into(), FieldValue::Text("".into()));

        let (validated, errors) = processor.validate(vec![good, bad], 0).await.unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].part_number, "AB");
        assert!(validated[0].active);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
    }

    #[tokio::test]
    async fn test_validate_all_failed_raises() {
        let processor: Processor<PartRecord> = Processor::without_transform(config());
        let mut bad = ProcessedRecord::new();
        bad.insert("part_number".into(), FieldValue::Text("".into()));

        let err = processor.validate(vec![bad], 0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_normalize_part_number() {
        assert_eq!(normalize_part_number("ab-12.3 x"), "AB123X");
        assert_eq!(normalize_part_number(""), "");
    }
}
