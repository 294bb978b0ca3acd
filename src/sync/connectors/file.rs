// Flat-file connector: CSV (configurable dialect) or JSON arrays of objects.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::sync::connectors::{Connector, FieldValue, RawRecord};
use crate::sync::model::SyncSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            _ => None,
        }
    }

    /// Guess from the file extension, defaulting to CSV.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Csv,
        }
    }
}

pub struct FileConnector {
    path: PathBuf,
    format: FileFormat,
    delimiter: u8,
    quote: u8,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            path: path.into(),
            format,
            delimiter: b',',
            quote: b'"',
        }
    }

    pub fn with_dialect(mut self, delimiter: u8, quote: u8) -> Self {
        self.delimiter = delimiter;
        self.quote = quote;
        self
    }

    fn json_to_field(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    fn read_csv(&self, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| AppError::Io(format!("cannot open {}: {}", self.path.display(), e)))?;

        let headers = reader
            .headers()
            .map_err(|e| AppError::Io(format!("cannot read CSV header: {}", e)))?
            .clone();

        let mut records = Vec::new();
        for row in reader.records() {
            if limit.map(|n| records.len() >= n).unwrap_or(false) {
                break;
            }
            let row = row.map_err(|e| AppError::Io(format!("CSV read error: {}", e)))?;
            let mut record = RawRecord::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                let field = if value.is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Text(value.to_string())
                };
                record.insert(header.to_string(), field);
            }
            records.push(record);
        }
        Ok(records)
    }

    fn read_json(&self, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| AppError::Io(format!("cannot open {}: {}", self.path.display(), e)))?;
        let parsed: Value = serde_json::from_str(&raw)?;
        let Value::Array(items) = parsed else {
            return Err(AppError::validation(
                "JSON import file must contain an array of objects",
            ));
        };

        let mut records = Vec::new();
        for item in items {
            if limit.map(|n| records.len() >= n).unwrap_or(false) {
                break;
            }
            let Value::Object(map) = item else {
                return Err(AppError::validation(
                    "JSON import file must contain an array of objects",
                ));
            };
            let record: RawRecord = map
                .iter()
                .map(|(key, value)| (key.clone(), Self::json_to_field(value)))
                .collect();
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl Connector for FileConnector {
    fn source(&self) -> SyncSource {
        SyncSource::File
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Err(AppError::Io(format!(
                "import file not found: {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// The query argument is informational for file sources; the configured
    /// path is the dataset.
    async fn extract(&mut self, _query: &str, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        let records = match self.format {
            FileFormat::Csv => self.read_csv(limit)?,
            FileFormat::Json => self.read_json(limit)?,
        };
        tracing::info!(
            records = records.len(),
            path = %self.path.display(),
            "extracted records from file"
        );
        Ok(records)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_csv_extraction() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "PRDNUM,PRDDESC,PRICE").unwrap();
        writeln!(file, "AB-123, Bracket ,19.95").unwrap();
        writeln!(file, "CD-456,Clamp,").unwrap();
        file.flush().unwrap();

        let mut connector = FileConnector::new(file.path(), FileFormat::Csv);
        connector.connect().await.unwrap();
        let records = connector.extract("", None).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["PRDNUM"], FieldValue::Text("AB-123".into()));
        // Dialect trims whitespace.
        assert_eq!(records[0]["PRDDESC"], FieldValue::Text("Bracket".into()));
        assert_eq!(records[1]["PRICE"], FieldValue::Null);
    }

    #[tokio::test]
    async fn test_csv_custom_delimiter() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "PRDNUM;QTY").unwrap();
        writeln!(file, "AB-123;5").unwrap();
        file.flush().unwrap();

        let mut connector =
            FileConnector::new(file.path(), FileFormat::Csv).with_dialect(b';', b'"');
        let records = connector.extract("", None).await.unwrap();
        assert_eq!(records[0]["QTY"], FieldValue::Text("5".into()));
    }

    #[tokio::test]
    async fn test_json_extraction_with_limit() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"PRDNUM": "AB-123", "QTY": 5, "ACTIVE": true}},
               {{"PRDNUM": "CD-456", "QTY": 2, "ACTIVE": false}}]"#
        )
        .unwrap();
        file.flush().unwrap();

        let mut connector = FileConnector::new(file.path(), FileFormat::Json);
        let records = connector.extract("", Some(1)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["QTY"], FieldValue::Integer(5));
        assert_eq!(records[0]["ACTIVE"], FieldValue::Boolean(true));
    }

    #[tokio::test]
    async fn test_json_requires_array_of_objects() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"not": "an array"}}"#).unwrap();
        file.flush().unwrap();

        let mut connector = FileConnector::new(file.path(), FileFormat::Json);
        assert!(connector.extract("", None).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let mut connector = FileConnector::new("/nonexistent/input.csv", FileFormat::Csv);
        assert!(connector.connect().await.is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            FileFormat::from_path(std::path::Path::new("data.JSON")),
            FileFormat::Json
        );
        assert_eq!(
            FileFormat::from_path(std::path::Path::new("data.csv")),
            FileFormat::Csv
        );
    }
}
