// AS400/iSeries connector.
//
// The ODBC driver sits behind a seam (`OdbcDriver`/`OdbcSession`) so the
// connector's security discipline is testable without an iSeries on the
// desk. The connection string always carries `ReadOnly=True`; if the driver
// rejects the extra parameters the connector retries once with a minimal
// string. Error messages are sanitized before logging: the plaintext
// password never reaches a log line.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::config::As400Settings;
use crate::error::{AppError, Result};
use crate::sync::connectors::{
    convert_row_types, validate_and_prepare_query, Connector, RawRecord,
};
use crate::sync::model::SyncSource;

/// Driver seam: opens sessions from a connection string.
#[async_trait]
pub trait OdbcDriver: Send + Sync {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn OdbcSession>>;
}

/// One open driver session.
#[async_trait]
pub trait OdbcSession: Send + Sync {
    async fn query(&mut self, sql: &str) -> Result<Vec<RawRecord>>;
    async fn close(&mut self) -> Result<()>;
}

/// Placeholder driver for deployments without ODBC configured; every open
/// fails with `Unavailable`.
pub struct DisconnectedDriver;

#[async_trait]
impl OdbcDriver for DisconnectedDriver {
    async fn open(&self, _connection_string: &str) -> Result<Box<dyn OdbcSession>> {
        Err(AppError::Unavailable("no ODBC driver configured".into()))
    }
}

pub struct As400Connector {
    config: As400Settings,
    driver: Box<dyn OdbcDriver>,
    session: Option<Box<dyn OdbcSession>>,
    accessed_tables: BTreeSet<String>,
}

impl As400Connector {
    pub fn new(config: As400Settings, driver: Box<dyn OdbcDriver>) -> Self {
        tracing::debug!(
            dsn = %config.dsn,
            server = %config.server.as_deref().unwrap_or("from DSN"),
            database = %config.database,
            "AS400 connector initialized"
        );
        Self {
            config,
            driver,
            session: None,
            accessed_tables: BTreeSet::new(),
        }
    }

    fn build_connection_string(&self, minimal: bool) -> String {
        let mut cs = format!(
            "DSN={};UID={};PWD={};DATABASE={};",
            self.config.dsn,
            self.config.username,
            self.config.password.expose(),
            self.config.database,
        );
        if !minimal {
            if let Some(server) = &self.config.server {
                cs.push_str(&format!("SYSTEM={};", server));
            }
            if let Some(port) = self.config.port {
                cs.push_str(&format!("PORT={};", port));
            }
            if self.config.ssl {
                cs.push_str("SSLCONNECTION=TRUE;");
            }
            cs.push_str(&format!(
                "ConnectionTimeout={};QueryTimeout={};",
                self.config.connection_timeout_secs, self.config.query_timeout_secs
            ));
        }
        cs.push_str("ReadOnly=True;");
        cs
    }

    /// Replace the plaintext password with `[REDACTED]` before any message
    /// leaves the connector.
    fn sanitize_error(&self, message: &str) -> String {
        let password = self.config.password.expose();
        if password.is_empty() {
            message.to_string()
        } else {
            message.replace(password, "[REDACTED]")
        }
    }

    fn classify(&self, err: AppError, context: &str) -> AppError {
        let message = self.sanitize_error(&err.to_string());
        tracing::error!(error = %message, "{}", context);
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("permission") || lowered.contains("access denied") {
            AppError::Security(format!("{}: {}", context, message))
        } else {
            AppError::Database(format!("{}: {}", context, message))
        }
    }
}

#[async_trait]
impl Connector for As400Connector {
    fn source(&self) -> SyncSource {
        SyncSource::As400
    }

    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        tracing::info!(
            database = %self.config.database,
            dsn = %self.config.dsn,
            "connecting to AS400"
        );

        let session = match self.driver.open(&self.build_connection_string(false)).await {
            Ok(session) => session,
            Err(first_err) => {
                // Some drivers reject the extra parameters; retry minimal.
                tracing::debug!(
                    error = %self.sanitize_error(&first_err.to_string()),
                    "connection attempt failed, retrying with minimal parameters"
                );
                self.driver
                    .open(&self.build_connection_string(true))
                    .await
                    .map_err(|err| self.classify(err, "Failed to connect to AS400"))?
            }
        };
        self.session = Some(session);
        tracing::info!(database = %self.config.database, "connected to AS400");
        Ok(())
    }

    async fn extract(&mut self, query: &str, limit: Option<usize>) -> Result<Vec<RawRecord>> {
        if self.session.is_none() {
            self.connect().await?;
        }

        let prepared =
            validate_and_prepare_query(query, limit, self.config.allowed_tables.as_deref())?;

        let session = self.session.as_mut().expect("connected above");
        let rows = match session.query(&prepared.sql).await {
            Ok(rows) => rows,
            Err(err) => return Err(self.classify(err, "Failed to extract data from AS400")),
        };

        if let Some(table) = &prepared.table {
            self.accessed_tables.insert(table.to_ascii_uppercase());
        }

        let converted: Vec<RawRecord> = rows.into_iter().map(convert_row_types).collect();
        tracing::info!(
            records = converted.len(),
            table = prepared.table.as_deref().unwrap_or("(query)"),
            "extracted records from AS400"
        );
        Ok(converted)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session
                .close()
                .await
                .map_err(|err| self.classify(err, "Failed to close AS400 connection"))?;
            tracing::debug!("AS400 connection closed");

            if !self.accessed_tables.is_empty() {
                let tables: Vec<&str> =
                    self.accessed_tables.iter().map(String::as_str).collect();
                tracing::info!(
                    tables = %tables.join(", "),
                    "AS400 session accessed tables"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Scripted driver: hands out rows and records the queries it saw.
    pub struct FakeDriver {
        pub rows: Vec<RawRecord>,
        pub seen_queries: Arc<Mutex<Vec<String>>>,
        pub fail_first_open: Arc<Mutex<bool>>,
    }

    impl FakeDriver {
        pub fn with_rows(rows: Vec<RawRecord>) -> Self {
            Self {
                rows,
                seen_queries: Arc::new(Mutex::new(Vec::new())),
                fail_first_open: Arc::new(Mutex::new(false)),
            }
        }
    }

    pub struct FakeSession {
        rows: Vec<RawRecord>,
        seen_queries: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl OdbcDriver for FakeDriver {
        async fn open(&self, _connection_string: &str) -> Result<Box<dyn OdbcSession>> {
            let mut fail = self.fail_first_open.lock();
            if *fail {
                *fail = false;
                return Err(AppError::Database("option not supported".into()));
            }
            Ok(Box::new(FakeSession {
                rows: self.rows.clone(),
                seen_queries: self.seen_queries.clone(),
            }))
        }
    }

    #[async_trait]
    impl OdbcSession for FakeSession {
        async fn query(&mut self, sql: &str) -> Result<Vec<RawRecord>> {
            self.seen_queries.lock().push(sql.to_string());
            Ok(self.rows.clone())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }
}
