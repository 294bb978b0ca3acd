// Sync scheduling service.
//
// Process-wide singleton: tracks active entity kinds (never two concurrent
// syncs of one kind), last-success timestamps, and one scheduled task per
// kind. Cancelling a schedule aborts the sleeping task only; a running
// pipeline always finishes its current chunk and records its outcome.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::CatalogStore;
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::metrics::MetricsService;
use crate::sync::connectors::as400::{As400Connector, DisconnectedDriver, OdbcDriver};
use crate::sync::connectors::{Connector, FieldValue};
use crate::sync::history::{SyncCounters, SyncHistoryRepository};
use crate::sync::importers::{
    Importer, MeasurementImport, MeasurementImporter, PricingImport, PricingImporter,
    ProductImport, ProductImporter, StockImport, StockImporter,
};
use crate::sync::model::{SyncEntityKind, SyncSource, SyncStatus};
use crate::sync::pipeline::{Pipeline, PipelineResult};
use crate::sync::processor::{product_transform, Processor, ProcessorConfig};

/// Kinds the scheduler drives on its interval.
pub const SCHEDULED_KINDS: [SyncEntityKind; 4] = [
    SyncEntityKind::Product,
    SyncEntityKind::Measurement,
    SyncEntityKind::Stock,
    SyncEntityKind::Pricing,
];

/// Backoff applied when a scheduled run errors out.
pub const FAILURE_RESCHEDULE_SECS: u64 = 300;

/// Extraction query per entity kind.
pub fn entity_query(kind: SyncEntityKind) -> &'static str {
    match kind {
        SyncEntityKind::Product => "SELECT * FROM PRODUCTLIB.PRODUCTS",
        SyncEntityKind::Measurement => "SELECT * FROM PRODUCTLIB.MEASUREMENTS",
        SyncEntityKind::Stock => "SELECT * FROM INVENTORYLIB.INVENTORY",
        SyncEntityKind::Pricing => "SELECT * FROM PRICELIB.PRICES",
        SyncEntityKind::Manufacturer => "SELECT * FROM PRODUCTLIB.MANUFACTURERS",
        SyncEntityKind::Customer => "SELECT * FROM SALESLIB.CUSTOMERS",
        SyncEntityKind::Order => "SELECT * FROM SALESLIB.ORDERS",
    }
}

// ============================================================================
// Entity processors
// ============================================================================

pub fn product_processor() -> Processor<ProductImport> {
    let mut field_mapping = HashMap::new();
    field_mapping.insert("part_number".to_string(), "PRDNUM".to_string());
    field_mapping.insert("application".to_string(), "PRDDESC".to_string());
    field_mapping.insert("vintage".to_string(), "VINTAGE_FLAG".to_string());
    field_mapping.insert("late_model".to_string(), "LATEMDL_FLAG".to_string());
    field_mapping.insert("soft".to_string(), "SOFT_FLAG".to_string());
    field_mapping.insert("universal".to_string(), "UNIVRSL_FLAG".to_string());
    field_mapping.insert("is_active".to_string(), "IS_ACTIVE".to_string());
    let config = ProcessorConfig {
        field_mapping,
        required_fields: vec!["part_number".to_string()],
        unique_key_field: Some("part_number".to_string()),
        ..ProcessorConfig::default()
    };
    Processor::new(config, product_transform())
}

/// Measurements arrive keyed by part number; resolve to the product
/// surrogate id through a map built once at batch start.
pub fn measurement_processor(catalog: &CatalogStore) -> Processor<MeasurementImport> {
    let product_map = catalog.product_id_map();
    let mut field_mapping = HashMap::new();
    field_mapping.insert("product_id".to_string(), "PRDNUM".to_string());
    field_mapping.insert("length".to_string(), "LENGTH".to_string());
    field_mapping.insert("width".to_string(), "WIDTH".to_string());
    field_mapping.insert("height".to_string(), "HEIGHT".to_string());
    field_mapping.insert("weight".to_string(), "WEIGHT".to_string());
    field_mapping.insert("volume".to_string(), "VOLUME".to_string());
    field_mapping.insert("dimensional_weight".to_string(), "DIMWT".to_string());
    let config = ProcessorConfig {
        field_mapping,
        required_fields: vec!["product_id".to_string()],
        unique_key_field: Some("product_id".to_string()),
        ..ProcessorConfig::default()
    };
    Processor::new(
        config,
        Box::new(move |record| {
            resolve_reference(record, "product_id", &product_map, "Product with part number")
        }),
    )
}

pub fn stock_processor(catalog: &CatalogStore) -> Processor<StockImport> {
    let product_map = catalog.product_id_map();
    let warehouse_map = catalog.warehouse_id_map();
    let mut field_mapping = HashMap::new();
    field_mapping.insert("product_id".to_string(), "PRDNUM".to_string());
    field_mapping.insert("warehouse_id".to_string(), "WRHSNUM".to_string());
    field_mapping.insert("quantity".to_string(), "QUANTITY".to_string());
    let config = ProcessorConfig {
        field_mapping,
        required_fields: vec![
            "product_id".to_string(),
            "warehouse_id".to_string(),
            "quantity".to_string(),
        ],
        unique_key_field: Some("product_id".to_string()),
        ..ProcessorConfig::default()
    };
    Processor::new(
        config,
        Box::new(move |record| {
            resolve_reference(record, "product_id", &product_map, "Product with part number")?;
            resolve_reference(record, "warehouse_id", &warehouse_map, "Warehouse with code")?;
            // Negative on-hand counts clamp to zero.
            if let Some(quantity) = record.get("quantity").and_then(FieldValue::as_i64) {
                if quantity < 0 {
                    record.insert("quantity".to_string(), FieldValue::Integer(0));
                }
            }
            Ok(())
        }),
    )
}

pub fn pricing_processor(catalog: &CatalogStore) -> Processor<PricingImport> {
    let product_map = catalog.product_id_map();
    let price_type_map = catalog.price_type_id_map();
    let mut field_mapping = HashMap::new();
    field_mapping.insert("product_id".to_string(), "PRDNUM".to_string());
    field_mapping.insert("price_type_id".to_string(), "PRCTYPE".to_string());
    field_mapping.insert("price".to_string(), "UNIT_PRICE".to_string());
    field_mapping.insert("currency".to_string(), "CURRENCY".to_string());
    let config = ProcessorConfig {
        field_mapping,
        required_fields: vec!["product_id".to_string(), "price_type_id".to_string()],
        unique_key_field: None,
        ..ProcessorConfig::default()
    };
    Processor::new(
        config,
        Box::new(move |record| {
            resolve_reference(record, "product_id", &product_map, "Product with part number")?;
            resolve_reference(record, "price_type_id", &price_type_map, "Price type")?;
            Ok(())
        }),
    )
}

fn resolve_reference(
    record: &mut crate::sync::processor::ProcessedRecord,
    field: &str,
    map: &HashMap<String, Uuid>,
    label: &str,
) -> Result<()> {
    if let Some(value) = record.get(field) {
        if let Some(key) = value.as_str() {
            let resolved = map.get(key).copied().ok_or_else(|| {
                AppError::validation(format!("{} {} not found", label, key))
            })?;
            record.insert(field.to_string(), FieldValue::Uuid(resolved));
        }
    }
    Ok(())
}

// ============================================================================
// Service
// ============================================================================

#[derive(Default)]
struct SchedulerState {
    active: HashSet<SyncEntityKind>,
    last_success: HashMap<SyncEntityKind, DateTime<Utc>>,
    tasks: HashMap<SyncEntityKind, JoinHandle<()>>,
}

/// Outcome surface of `run_sync`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSyncOutcome {
    pub success: bool,
    pub message: String,
    pub entity_kind: SyncEntityKind,
    pub status: String,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub sync_time: f64,
    pub sync_timestamp: String,
}

/// Shared-driver adapter so one configured driver can back many connectors.
struct SharedDriver(Arc<dyn OdbcDriver>);

#[async_trait::async_trait]
impl OdbcDriver for SharedDriver {
    async fn open(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn crate::sync::connectors::as400::OdbcSession>> {
        self.0.open(connection_string).await
    }
}

pub struct SyncService {
    settings: Settings,
    history: Arc<SyncHistoryRepository>,
    catalog: Arc<CatalogStore>,
    events: Arc<EventBus>,
    metrics: RwLock<Option<Arc<MetricsService>>>,
    driver: Arc<dyn OdbcDriver>,
    state: Mutex<SchedulerState>,
    initialized: AtomicBool,
}

impl SyncService {
    pub fn new(
        settings: Settings,
        history: Arc<SyncHistoryRepository>,
        catalog: Arc<CatalogStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            settings,
            history,
            catalog,
            events,
            metrics: RwLock::new(None),
            driver: Arc::new(DisconnectedDriver),
            state: Mutex::new(SchedulerState::default()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn OdbcDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn set_metrics(&self, metrics: Arc<MetricsService>) {
        *self.metrics.write() = Some(metrics);
    }

    pub fn history(&self) -> Arc<SyncHistoryRepository> {
        self.history.clone()
    }

    /// Schedule the recurring syncs. A disabled feature flag leaves the
    /// service idle but responsive to forced runs.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.settings.as400.sync_enabled {
            tracing::info!("AS400 sync is disabled in configuration");
            return Ok(());
        }
        for kind in SCHEDULED_KINDS {
            self.schedule_sync(kind, None);
        }
        tracing::info!("sync service initialized");
        Ok(())
    }

    /// Cancel every scheduled task and clear state.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock();
        for (kind, task) in state.tasks.drain() {
            tracing::info!(kind = kind.as_str(), "cancelling scheduled sync");
            task.abort();
        }
        state.active.clear();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("sync service shut down");
    }

    /// (Re)schedule the next run for a kind, replacing any pending task.
    pub fn schedule_sync(self: &Arc<Self>, kind: SyncEntityKind, delay_seconds: Option<u64>) {
        let delay = delay_seconds.unwrap_or(self.settings.sync_interval_secs);
        let service = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            let outcome = service.run_sync(kind, false).await;
            if !outcome.success && outcome.status == "failed" {
                service.schedule_sync(kind, Some(FAILURE_RESCHEDULE_SECS));
            }
        });

        let mut state = self.state.lock();
        if let Some(existing) = state.tasks.insert(kind, task) {
            existing.abort();
        }
        tracing::info!(kind = kind.as_str(), delay, "scheduled sync");
    }

    /// Run one sync now. A kind already active is skipped unless forced.
    pub async fn run_sync(self: &Arc<Self>, kind: SyncEntityKind, force: bool) -> RunSyncOutcome {
        {
            let mut state = self.state.lock();
            if state.active.contains(&kind) && !force {
                tracing::warn!(kind = kind.as_str(), "sync already running, skipping");
                return RunSyncOutcome {
                    success: false,
                    message: format!("Sync for {} is already running", kind.as_str()),
                    entity_kind: kind,
                    status: "skipped".to_string(),
                    records_processed: 0,
                    records_created: 0,
                    records_updated: 0,
                    records_failed: 0,
                    sync_time: 0.0,
                    sync_timestamp: Utc::now().to_rfc3339(),
                };
            }
            state.active.insert(kind);
        }

        tracing::info!(kind = kind.as_str(), "starting sync");
        let record = self
            .history
            .create_sync(kind, SyncSource::As400, None, None, Value::Null)
            .await;

        let result = self.run_entity_pipeline(kind).await;

        let status = if result.success {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };
        let counters = SyncCounters {
            processed: result.records_processed,
            created: result.records_created,
            updated: result.records_updated,
            failed: result.records_with_errors,
        };
        let error_message = if result.success {
            None
        } else {
            Some(result.message.clone())
        };
        if let Err(err) = self
            .history
            .update_sync_status(record.id, status, counters, error_message)
            .await
        {
            tracing::error!(sync = %record.id, error = %err, "failed to record sync outcome");
        }
        let _ = self
            .history
            .add_sync_event(
                record.id,
                "audit",
                &format!("as400_sync_{}", kind.as_str()),
                json!({
                    "records_processed": result.records_processed,
                    "records_created": result.records_created,
                    "records_updated": result.records_updated,
                    "records_with_errors": result.records_with_errors,
                    "sync_time": result.total_time,
                    "message": result.message,
                }),
            )
            .await;
        self.events
            .publish(
                "sync.completed",
                json!({
                    "entity_kind": kind.as_str(),
                    "success": result.success,
                    "records_processed": result.records_processed,
                }),
                None,
            )
            .await;
        if let Some(metrics) = self.metrics.read().clone() {
            let status_label = if result.success { "completed" } else { "failed" };
            metrics.registry().increment_counter(
                "sync_runs_total",
                1.0,
                &[("entity", kind.as_str()), ("status", status_label)],
            );
            metrics.registry().observe_histogram(
                "sync_run_duration_seconds",
                result.total_time,
                &[("entity", kind.as_str())],
            );
        }

        {
            let mut state = self.state.lock();
            if result.success {
                state.last_success.insert(kind, Utc::now());
            }
            state.active.remove(&kind);
        }
        if self.settings.as400.sync_enabled {
            self.schedule_sync(kind, None);
        }

        tracing::info!(
            kind = kind.as_str(),
            processed = result.records_processed,
            created = result.records_created,
            updated = result.records_updated,
            errors = result.records_with_errors,
            "sync complete"
        );
        RunSyncOutcome {
            success: result.success,
            message: result.message,
            entity_kind: kind,
            status: if result.success {
                "completed".to_string()
            } else {
                "failed".to_string()
            },
            records_processed: result.records_processed,
            records_created: result.records_created,
            records_updated: result.records_updated,
            records_failed: result.records_with_errors,
            sync_time: result.total_time,
            sync_timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn make_connector(&self) -> Box<dyn Connector> {
        Box::new(As400Connector::new(
            self.settings.as400.clone(),
            Box::new(SharedDriver(self.driver.clone())),
        ))
    }

    async fn run_entity_pipeline(&self, kind: SyncEntityKind) -> PipelineResult {
        let chunk_size = self.settings.sync_batch_size;
        let query = entity_query(kind);
        match kind {
            SyncEntityKind::Product => {
                let importer: Arc<dyn Importer<ProductImport>> =
                    Arc::new(ProductImporter::new(self.catalog.clone()));
                Pipeline::new(self.make_connector(), product_processor(), importer)
                    .with_chunk_size(chunk_size)
                    .run(query, None)
                    .await
            }
            SyncEntityKind::Measurement => {
                let importer: Arc<dyn Importer<MeasurementImport>> =
                    Arc::new(MeasurementImporter::new(self.catalog.clone()));
                Pipeline::new(
                    self.make_connector(),
                    measurement_processor(&self.catalog),
                    importer,
                )
                .with_chunk_size(chunk_size)
                .run(query, None)
                .await
            }
            SyncEntityKind::Stock => {
                let importer: Arc<dyn Importer<StockImport>> =
                    Arc::new(StockImporter::new(self.catalog.clone()));
                Pipeline::new(
                    self.make_connector(),
                    stock_processor(&self.catalog),
                    importer,
                )
                .with_chunk_size(chunk_size)
                .run(query, None)
                .await
            }
            SyncEntityKind::Pricing => {
                let importer: Arc<dyn Importer<PricingImport>> =
                    Arc::new(PricingImporter::new(self.catalog.clone()));
                Pipeline::new(
                    self.make_connector(),
                    pricing_processor(&self.catalog),
                    importer,
                )
                .with_chunk_size(chunk_size)
                .run(query, None)
                .await
            }
            other => {
                let mut result = PipelineResult {
                    success: false,
                    message: format!("Unsupported entity type: {}", other.as_str()),
                    ..empty_result()
                };
                result.sync_timestamp = Utc::now().to_rfc3339();
                result
            }
        }
    }

    /// Current scheduler view: active kinds, last successes, optional
    /// per-kind history.
    pub async fn status(&self, kind: Option<SyncEntityKind>) -> Value {
        let (active, last_success): (Vec<String>, HashMap<String, String>) = {
            let state = self.state.lock();
            (
                state.active.iter().map(|k| k.as_str().to_string()).collect(),
                state
                    .last_success
                    .iter()
                    .map(|(k, t)| (k.as_str().to_string(), t.to_rfc3339()))
                    .collect(),
            )
        };
        let mut status = json!({
            "is_initialized": self.initialized.load(Ordering::SeqCst),
            "active_syncs": active,
            "last_sync_times": last_success,
        });
        if let Some(kind) = kind {
            let history = self.history.get_latest_syncs(Some(kind), 20).await;
            status["entity_history"] = serde_json::to_value(&history).unwrap_or(Value::Null);
            status["current_status"] = Value::String(
                if self.state.lock().active.contains(&kind) {
                    "running".to_string()
                } else {
                    "idle".to_string()
                },
            );
        }
        status
    }
}

fn empty_result() -> PipelineResult {
    PipelineResult {
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
        dry_run: false,
        sync_timestamp: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connectors::as400::test_support::FakeDriver;
    use crate::sync::connectors::RawRecord;

    fn rows(count: usize) -> Vec<RawRecord> {
        (0..count)
            .map(|i| {
                let mut record = RawRecord::new();
                record.insert("PRDNUM".into(), FieldValue::Text(format!("AB-{}", i)));
                record.insert("PRDDESC".into(), FieldValue::Text("Bracket".into()));
                record.insert("IS_ACTIVE".into(), FieldValue::Text("Y".into()));
                record
            })
            .collect()
    }

    fn service_with_rows(rows: Vec<RawRecord>) -> Arc<SyncService> {
        let settings = Settings::default();
        Arc::new(
            SyncService::new(
                settings,
                Arc::new(SyncHistoryRepository::new()),
                Arc::new(CatalogStore::new()),
                Arc::new(EventBus::new()),
            )
            .with_driver(Arc::new(FakeDriver::with_rows(rows))),
        )
    }

    #[tokio::test]
    async fn test_run_sync_records_history() {
        let service = service_with_rows(rows(5));
        let outcome = service.run_sync(SyncEntityKind::Product, false).await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.records_created, 5);

        let history = service
            .history()
            .get_latest_syncs(Some(SyncEntityKind::Product), 10)
            .await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SyncStatus::Completed);
        assert_eq!(history[0].records_created, 5);
        assert!(history[0].completed_at.unwrap() >= history[0].started_at);

        let events = service.history().get_sync_events(history[0].id).await;
        assert!(events.iter().any(|e| e.event_kind == "audit"));
    }

    #[tokio::test]
    async fn test_run_sync_skips_when_active() {
        let service = service_with_rows(rows(1));
        {
            let mut state = service.state.lock();
            state.active.insert(SyncEntityKind::Product);
        }
        let outcome = service.run_sync(SyncEntityKind::Product, false).await;
        assert_eq!(outcome.status, "skipped");

        // Forced runs go through.
        let forced = service.run_sync(SyncEntityKind::Product, true).await;
        assert_eq!(forced.status, "completed");
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_cleanly() {
        let service = service_with_rows(rows(1));
        let outcome = service.run_sync(SyncEntityKind::Customer, false).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, "failed");
    }

    #[tokio::test]
    async fn test_status_surface() {
        let service = service_with_rows(rows(2));
        service.run_sync(SyncEntityKind::Product, false).await;

        let status = service.status(Some(SyncEntityKind::Product)).await;
        assert_eq!(status["current_status"], "idle");
        assert!(status["last_sync_times"]["product"].is_string());
        assert!(status["entity_history"].as_array().unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let service = service_with_rows(rows(1));
        service.schedule_sync(SyncEntityKind::Product, Some(3600));
        assert!(!service.state.lock().tasks.is_empty());
        service.shutdown().await;
        assert!(service.state.lock().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_measurement_sync_resolves_parents() {
        // Seed products first, then run a measurement sync keyed by part
        // number.
        let settings = Settings::default();
        let catalog = Arc::new(CatalogStore::new());
        let product_service = Arc::new(
            SyncService::new(
                settings.clone(),
                Arc::new(SyncHistoryRepository::new()),
                catalog.clone(),
                Arc::new(EventBus::new()),
            )
            .with_driver(Arc::new(FakeDriver::with_rows(rows(3)))),
        );
        product_service.run_sync(SyncEntityKind::Product, false).await;

        let mut measurement = RawRecord::new();
        measurement.insert("PRDNUM".into(), FieldValue::Text("AB-1".into()));
        measurement.insert("LENGTH".into(), FieldValue::Decimal("10.5".into()));
        let measurement_service = Arc::new(
            SyncService::new(
                settings,
                Arc::new(SyncHistoryRepository::new()),
                catalog.clone(),
                Arc::new(EventBus::new()),
            )
            .with_driver(Arc::new(FakeDriver::with_rows(vec![measurement]))),
        );
        let outcome = measurement_service
            .run_sync(SyncEntityKind::Measurement, false)
            .await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.records_created, 1);

        let product = catalog.product_by_part_number("AB-1").unwrap();
        let rows = catalog.measurements_for(product.id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].length, Some(10.5));
    }
}
