// Pipeline orchestration: extract -> process -> validate -> import.
//
// Phases run strictly sequentially per chunk and chunks in order. Per-record
// errors never abort a chunk; per-chunk errors never abort a run; a whole-run
// failure (connector cannot open) produces a failed envelope. The connector
// is closed on every path.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::error::RecordError;
use crate::sync::connectors::Connector;
use crate::sync::importers::Importer;
use crate::sync::processor::{DestinationRecord, Processor};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Result envelope of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub message: String,
    pub records_extracted: u64,
    pub records_processed: u64,
    pub records_validated: u64,
    pub records_imported: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_with_errors: u64,
    pub error_details: Vec<RecordError>,
    pub extract_time: f64,
    pub process_time: f64,
    pub validate_time: f64,
    pub import_time: f64,
    pub total_time: f64,
    pub dry_run: bool,
    pub sync_timestamp: String,
}

impl PipelineResult {
    fn base(dry_run: bool) -> Self {
        Self {
            success: false,
            message: String::new(),
            records_extracted: 0,
            records_processed: 0,
            records_validated: 0,
            records_imported: 0,
            records_created: 0,
            records_updated: 0,
            records_with_errors: 0,
            error_details: Vec::new(),
            extract_time: 0.0,
            process_time: 0.0,
            validate_time: 0.0,
            import_time: 0.0,
            total_time: 0.0,
            dry_run,
            sync_timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub struct Pipeline<T: DestinationRecord> {
    connector: Box<dyn Connector>,
    processor: Processor<T>,
    importer: Arc<dyn Importer<T>>,
    dry_run: bool,
    chunk_size: usize,
}

impl<T: DestinationRecord> Pipeline<T> {
    pub fn new(
        connector: Box<dyn Connector>,
        processor: Processor<T>,
        importer: Arc<dyn Importer<T>>,
    ) -> Self {
        Self {
            connector,
            processor,
            importer,
            dry_run: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn close_connector(&mut self) {
        if let Err(err) = self.connector.close().await {
            tracing::error!(error = %err, "error closing connector");
        }
    }

    pub async fn run(&mut self, query: &str, limit: Option<usize>) -> PipelineResult {
        let started = Instant::now();
        let mut result = PipelineResult::base(self.dry_run);

        tracing::info!(query, ?limit, "starting data extraction");
        let extract_started = Instant::now();
        if let Err(err) = self.connector.connect().await {
            result.message = format!("Pipeline failed: {}", err);
            result.total_time = started.elapsed().as_secs_f64();
            self.close_connector().await;
            return result;
        }
        let raw_records = match self.connector.extract(query, limit).await {
            Ok(records) => records,
            Err(err) => {
                result.message = format!("Pipeline failed: {}", err);
                result.total_time = started.elapsed().as_secs_f64();
                self.close_connector().await;
                return result;
            }
        };
        result.extract_time = extract_started.elapsed().as_secs_f64();
        result.records_extracted = raw_records.len() as u64;

        if raw_records.is_empty() {
            tracing::warn!("no data extracted");
            self.close_connector().await;
            result.success = true;
            result.message = "No data extracted".to_string();
            result.total_time = started.elapsed().as_secs_f64();
            return result;
        }
        tracing::info!(
            records = raw_records.len(),
            elapsed = result.extract_time,
            "extraction complete"
        );

        let chunk_count = (raw_records.len() + self.chunk_size - 1) / self.chunk_size;
        for chunk_index in 0..chunk_count {
            let start_idx = chunk_index * self.chunk_size;
            let end_idx = ((chunk_index + 1) * self.chunk_size).min(raw_records.len());
            let chunk = &raw_records[start_idx..end_idx];
            tracing::debug!(
                chunk = chunk_index + 1,
                of = chunk_count,
                records = chunk.len(),
                "processing chunk"
            );

            let process_started = Instant::now();
            let (processed, process_errors) = self.processor.process(chunk, start_idx).await;
            result.process_time += process_started.elapsed().as_secs_f64();
            result.records_processed += processed.len() as u64;
            result.records_with_errors += process_errors.len() as u64;
            result.error_details.extend(process_errors);

            let validate_started = Instant::now();
            let validated = match self.processor.validate(processed, start_idx).await {
                Ok((validated, validation_errors)) => {
                    result.validate_time += validate_started.elapsed().as_secs_f64();
                    result.records_with_errors += validation_errors.len() as u64;
                    result.error_details.extend(validation_errors);
                    validated
                }
                Err(err) => {
                    // Whole chunk failed validation; later chunks still run.
                    result.validate_time += validate_started.elapsed().as_secs_f64();
                    tracing::error!(chunk = chunk_index + 1, error = %err, "chunk failed validation");
                    result.records_with_errors += 1;
                    result
                        .error_details
                        .push(RecordError::new(start_idx, None, err.to_string()));
                    continue;
                }
            };
            result.records_validated += validated.len() as u64;

            if self.dry_run || validated.is_empty() {
                continue;
            }
            let import_started = Instant::now();
            match self.importer.import(validated).await {
                Ok(outcome) => {
                    result.import_time += import_started.elapsed().as_secs_f64();
                    result.records_created += outcome.created;
                    result.records_updated += outcome.updated;
                    result.records_with_errors += outcome.errors;
                    // Shift importer indices to refer to the full extract.
                    for mut detail in outcome.error_details {
                        detail.index += start_idx;
                        result.error_details.push(detail);
                    }
                }
                Err(err) => {
                    result.import_time += import_started.elapsed().as_secs_f64();
                    tracing::error!(chunk = chunk_index + 1, error = %err, "chunk import failed");
                    result.records_with_errors += 1;
                    result
                        .error_details
                        .push(RecordError::new(start_idx, None, err.to_string()));
                }
            }
        }

        self.close_connector().await;

        result.records_imported = result.records_created + result.records_updated;
        result.success = result.records_with_errors == 0;
        result.message = if self.dry_run {
            "Dry run, no data imported".to_string()
        } else {
            "Import completed".to_string()
        };
        result.total_time = started.elapsed().as_secs_f64();

        tracing::info!(
            extracted = result.records_extracted,
            processed = result.records_processed,
            validated = result.records_validated,
            created = result.records_created,
            updated = result.records_updated,
            errors = result.records_with_errors,
            elapsed = result.total_time,
            "sync pipeline complete"
        );
        result
    }
}

// ============================================================================
// Parallel pipeline
// ============================================================================

/// A pipeline bound to its query, runnable without knowing the record type.
#[async_trait]
pub trait RunnablePipeline: Send {
    fn pipeline_name(&self) -> &str;
    async fn run_configured(&mut self) -> PipelineResult;
}

pub struct ConfiguredPipeline<T: DestinationRecord> {
    pub name: String,
    pub pipeline: Pipeline<T>,
    pub query: String,
    pub limit: Option<usize>,
}

#[async_trait]
impl<T: DestinationRecord> RunnablePipeline for ConfiguredPipeline<T> {
    fn pipeline_name(&self) -> &str {
        &self.name
    }

    async fn run_configured(&mut self) -> PipelineResult {
        let query = self.query.clone();
        self.pipeline.run(&query, self.limit).await
    }
}

/// Aggregated envelope of a parallel run.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelResult {
    pub success: bool,
    pub pipelines_total: usize,
    pub pipelines_successful: usize,
    pub pipelines_failed: usize,
    pub records_extracted: u64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_with_errors: u64,
    pub pipeline_results: Vec<(String, PipelineResult)>,
    pub total_time: f64,
    pub sync_timestamp: String,
}

/// Runs a fixed set of single-entity pipelines concurrently under a
/// semaphore. One pipeline's failure never affects the others.
pub struct ParallelPipeline {
    pipelines: Vec<Box<dyn RunnablePipeline>>,
    max_workers: usize,
}

impl ParallelPipeline {
    pub fn new(pipelines: Vec<Box<dyn RunnablePipeline>>, max_workers: usize) -> Self {
        Self {
            pipelines,
            max_workers: max_workers.max(1),
        }
    }

    pub async fn run(self) -> ParallelResult {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));

        let tasks = self.pipelines.into_iter().map(|mut pipeline| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let name = pipeline.pipeline_name().to_string();
                let result = pipeline.run_configured().await;
                (name, result)
            }
        });
        let pipeline_results: Vec<(String, PipelineResult)> = join_all(tasks).await;

        let mut aggregated = ParallelResult {
            success: true,
            pipelines_total: pipeline_results.len(),
            pipelines_successful: 0,
            pipelines_failed: 0,
            records_extracted: 0,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_with_errors: 0,
            pipeline_results: Vec::new(),
            total_time: 0.0,
            sync_timestamp: Utc::now().to_rfc3339(),
        };
        for (name, result) in pipeline_results {
            if result.success {
                aggregated.pipelines_successful += 1;
            } else {
                aggregated.pipelines_failed += 1;
            }
            aggregated.records_extracted += result.records_extracted;
            aggregated.records_processed += result.records_processed;
            aggregated.records_created += result.records_created;
            aggregated.records_updated += result.records_updated;
            aggregated.records_with_errors += result.records_with_errors;
            aggregated.pipeline_results.push((name, result));
        }
        aggregated.success = aggregated.pipelines_failed == 0;
        aggregated.total_time = started.elapsed().as_secs_f64();

        tracing::info!(
            successful = aggregated.pipelines_successful,
            failed = aggregated.pipelines_failed,
            created = aggregated.records_created,
            updated = aggregated.records_updated,
            errors = aggregated.records_with_errors,
            elapsed = aggregated.total_time,
            "parallel sync complete"
        );
        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use crate::sync::connectors::file::{FileConnector, FileFormat};
    use crate::sync::importers::{ProductImport, ProductImporter};
    use crate::sync::processor::{product_transform, ProcessorConfig};
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn product_processor() -> Processor<ProductImport> {
        let mut field_mapping = HashMap::new();
        field_mapping.insert("part_number".to_string(), "PRDNUM".to_string());
        field_mapping.insert("application".to_string(), "PRDDESC".to_string());
        let config = ProcessorConfig {
            field_mapping,
            required_fields: vec!["part_number".to_string()],
            unique_key_field: Some("part_number".to_string()),
            ..ProcessorConfig::default()
        };
        Processor::new(config, product_transform())
    }

    fn csv_fixture(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "PRDNUM,PRDDESC").unwrap();
        for i in 0..rows {
            writeln!(file, "AB-{},Bracket {}", i, i).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_pipeline_run_and_idempotence() {
        let file = csv_fixture(250);
        let store = Arc::new(CatalogStore::new());

        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store.clone())),
        )
        .with_chunk_size(100);

        let first = pipeline.run("", None).await;
        assert!(first.success, "{}", first.message);
        assert_eq!(first.records_extracted, 250);
        assert_eq!(first.records_created, 250);
        assert_eq!(first.records_updated, 0);
        assert_eq!(first.records_with_errors, 0);

        // Running the same extract again updates, never duplicates.
        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store.clone())),
        )
        .with_chunk_size(100);
        let second = pipeline.run("", None).await;
        assert_eq!(second.records_created, 0);
        assert_eq!(second.records_updated, 250);
        assert_eq!(store.product_count(), 250);
    }

    #[tokio::test]
    async fn test_pipeline_empty_extract() {
        let file = csv_fixture(0);
        let store = Arc::new(CatalogStore::new());
        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store)),
        );

        let result = pipeline.run("", None).await;
        assert!(result.success);
        assert_eq!(result.records_extracted, 0);
        assert_eq!(result.records_created, 0);
        assert_eq!(result.message, "No data extracted");
    }

    #[tokio::test]
    async fn test_pipeline_dry_run_imports_nothing() {
        let file = csv_fixture(10);
        let store = Arc::new(CatalogStore::new());
        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store.clone())),
        )
        .with_dry_run(true);

        let result = pipeline.run("", None).await;
        assert!(result.success);
        assert_eq!(result.records_validated, 10);
        assert_eq!(result.records_created, 0);
        assert_eq!(store.product_count(), 0);
        assert!(result.dry_run);
    }

    #[tokio::test]
    async fn test_pipeline_connector_failure_is_failed_envelope() {
        let store = Arc::new(CatalogStore::new());
        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new("/nonexistent/x.csv", FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store)),
        );

        let result = pipeline.run("", None).await;
        assert!(!result.success);
        assert!(result.message.starts_with("Pipeline failed"));
    }

    #[tokio::test]
    async fn test_pipeline_error_indices_span_chunks() {
        // A duplicate in the second chunk must be reported with its extract
        // position, not its chunk position.
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "PRDNUM,PRDDESC").unwrap();
        for i in 0..5 {
            writeln!(file, "AB-{},Bracket", i).unwrap();
        }
        // Rows 5..10, with row 7 duplicating row 5 inside the same chunk.
        writeln!(file, "CD-0,Clamp").unwrap();
        writeln!(file, "CD-1,Clamp").unwrap();
        writeln!(file, "CD-0,Clamp dup").unwrap();
        file.flush().unwrap();

        let store = Arc::new(CatalogStore::new());
        let mut pipeline = Pipeline::new(
            Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
            product_processor(),
            Arc::new(ProductImporter::new(store)),
        )
        .with_chunk_size(5);

        let result = pipeline.run("", None).await;
        assert_eq!(result.records_with_errors, 1);
        assert_eq!(result.error_details[0].index, 7);
    }

    #[tokio::test]
    async fn test_parallel_pipeline_isolation() {
        let good_file = csv_fixture(10);
        let store = Arc::new(CatalogStore::new());

        let good = ConfiguredPipeline {
            name: "products".to_string(),
            pipeline: Pipeline::new(
                Box::new(FileConnector::new(good_file.path(), FileFormat::Csv)),
                product_processor(),
                Arc::new(ProductImporter::new(store.clone())),
            ),
            query: String::new(),
            limit: None,
        };
        let bad = ConfiguredPipeline {
            name: "broken".to_string(),
            pipeline: Pipeline::new(
                Box::new(FileConnector::new("/nonexistent/x.csv", FileFormat::Csv)),
                product_processor(),
                Arc::new(ProductImporter::new(store.clone())),
            ),
            query: String::new(),
            limit: None,
        };

        let parallel = ParallelPipeline::new(vec![Box::new(good), Box::new(bad)], 2);
        let result = parallel.run().await;

        assert!(!result.success);
        assert_eq!(result.pipelines_successful, 1);
        assert_eq!(result.pipelines_failed, 1);
        assert_eq!(result.records_created, 10);
        assert_eq!(store.product_count(), 10);
    }
}
