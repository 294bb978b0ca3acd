// FileMaker connector.
//
// Same surface and read-only discipline as the AS400 connector, different
// driver: the connection string is DSN-less against the FileMaker ODBC
// driver.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::config::FileMakerSettings;
use crate::error::AppError;
use crate::error::Result;
use crate::sync::connectors::as400::{OdbcDriver, OdbcSession};
use crate::sync::connectors::{
    convert_row_types, validate_and_prepare_query, Connector, RawRecord,
};
use crate::sync::model::SyncSource;

pub struct FileMakerConnector {
    config: FileMakerSettings,
    driver: Box<dyn OdbcDriver>,
    session: Option<Box<dyn OdbcSession>>,
    accessed_tables: BTreeSet<String>,
}

impl FileMakerConnector {
    pub fn new(config: FileMakerSettings, driver: Box<dyn OdbcDriver>) -> Self {
        tracing::debug!(
            server = %config.server,
            database = %config.database,
            "FileMaker connector initialized"
        );
        Self {
            config,
            driver,
            session: None,
            accessed_tables: BTreeSet::new(),
        }
    }

    fn build_connection_string(&self) -> String {
        let mut cs = format!(
            "Driver={{FileMaker ODBC}};Server={};UID={};PWD={};Database={};",
            self.config.server,
            self.config.username,
            self.config.password.expose(),
            self.config.database,
        );
        if let Some(port) = self.config.port {
            cs.push_str(&format!("Port={};", port));
        }
        if self.config.ssl {
            cs.push_str("SSL=1;");
        }
        cs.push_str("ReadOnly=True;");
        cs
    }

    fn sanitize_error(&self, message: &str) -> String {
        let password = self.config.password.expose();
        if password.is_empty() {
            message.to_string()
        } else {
            message.replace(password, "[REDACTED]")
        }
    }
}

#[async_trait]
impl Connector for FileMakerConnector {
    fn source(&self) -> SyncSource {
        SyncSource::Filemaker
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        tracing::info!(database = %self.config.database, "connecting to FileMaker");
        let session = self
            .driver
            .open(&self.build_connection_string())
            .await
            .map_err(|err| {
                AppError::Database(format!(
                    "Failed to connect to FileMaker: {}",
                    self.sanitize_error(&err.to_string())
                ))
            })?;
        self.session = Some(session);
        Ok(())
    }

    async fn extract(&mut self, query: &str, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        if self.session.is_none() {
            self.connect().await?;
        }
        let prepared =
            validate_and_prepare_query(query, limit, self.config.allowed_tables.as_deref())?;

        let session = self.session.as_mut().expect("connected above");
        let rows = session.query(&prepared.sql).await.map_err(|err| {
            AppError::Database(format!(
                "Failed to extract data from FileMaker: {}",
                self.sanitize_error(&err.to_string())
            ))
        })?;

        if let Some(table) = &prepared.table {
            self.accessed_tables.insert(table.to_ascii_uppercase());
        }
        Ok(rows.into_iter().map(convert_row_types).collect())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.close().await?;
            if !self.accessed_tables.is_empty() {
                let tables: Vec<&str> =
                    self.accessed_tables.iter().map(String::as_str).collect();
                tracing::info!(tables = %tables.join(", "), "FileMaker session accessed tables");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::sync::connectors::as400::test_support::FakeDriver;
    use crate::sync::connectors::FieldValue;

    fn settings() -> FileMakerSettings {
        FileMakerSettings {
            server: "fm.example.internal".into(),
            username: "reader".into(),
            password: Secret::new("fm-pass"),
            database: "Parts".into(),
            allowed_tables: Some(vec!["CATALOG".into()]),
            ..FileMakerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_extract_respects_whitelist() {
        let mut record = RawRecord::new();
        record.insert("PRDNUM".into(), FieldValue::Text("ZZ-9".into()));
        let mut connector =
            FileMakerConnector::new(settings(), Box::new(FakeDriver::with_rows(vec![record])));

        let rows = connector.extract("catalog", Some(5)).await.unwrap();
        assert_eq!(rows.len(), 1);

        let err = connector.extract("USERS", None).await.unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
        connector.close().await.unwrap();
    }

    #[test]
    fn test_connection_string_shape() {
        let connector =
            FileMakerConnector::new(settings(), Box::new(FakeDriver::with_rows(vec![])));
        let cs = connector.build_connection_string();
        assert!(cs.starts_with("Driver={FileMaker ODBC};"));
        assert!(cs.contains("Server=fm.example.internal;"));
        assert!(cs.ends_with("ReadOnly=True;"));
    }
}
