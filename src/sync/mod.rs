// # Sync Engine
//
// Scheduled external-data synchronization: connectors extract from foreign
// systems (AS400/DB2, FileMaker, flat files), typed processors transform and
// validate, importers idempotently upsert into the primary store, and the
// pipeline orchestrates the phases per entity kind. The scheduler drives
// recurring runs and the history repository audits every run.

pub mod connectors;
pub mod history;
pub mod importers;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod scheduler;

pub use connectors::{
    As400Connector, Connector, FieldValue, FileConnector, FileFormat, FileMakerConnector,
    OdbcDriver, OdbcSession, RawRecord,
};
pub use history::{SyncCounters, SyncHistoryRepository};
pub use importers::{
    ImportOutcome, Importer, MeasurementImport, MeasurementImporter, PricingImport,
    PricingImporter, ProductDescriptionInput, ProductImport, ProductImporter,
    ProductMarketingInput, StockImport, StockImporter,
};
pub use model::{
    SyncEntityKind, SyncEventRecord, SyncHistoryRecord, SyncSource, SyncStats, SyncStatus,
};
pub use pipeline::{
    ConfiguredPipeline, ParallelPipeline, ParallelResult, Pipeline, PipelineResult,
    RunnablePipeline, DEFAULT_CHUNK_SIZE,
};
pub use processor::{
    normalize_part_number, product_transform, DestinationRecord, ProcessedRecord, Processor,
    ProcessorConfig, TransformHook,
};
pub use scheduler::{
    entity_query, measurement_processor, pricing_processor, product_processor, stock_processor,
    RunSyncOutcome, SyncService, FAILURE_RESCHEDULE_SECS, SCHEDULED_KINDS,
};
