// Idempotent upsert importers, one per entity kind.
//
// Each importer reads the batch's natural keys, fetches existing rows in one
// pass, then updates or inserts per record. The batch commits as a unit: the
// plan is applied under a single write section of the catalog store.
// Missing parents are per-record errors, never batch failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::catalog::{
    CatalogStore, ProductDescriptionRow, ProductMarketingRow, ProductMeasurementRow,
    ProductPricingRow, ProductRow, ProductStockRow,
};
use crate::error::{AppError, RecordError, Result};
use crate::sync::connectors::FieldValue;
use crate::sync::processor::{DestinationRecord, ProcessedRecord};

// ============================================================================
// Destination records
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProductDescriptionInput {
    pub description_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductMarketingInput {
    pub marketing_type: String,
    pub content: String,
    pub position: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ProductImport {
    pub part_number: String,
    pub part_number_stripped: String,
    pub application: Option<String>,
    pub vintage: bool,
    pub late_model: bool,
    pub soft: bool,
    pub universal: bool,
    pub is_active: bool,
    pub descriptions: Vec<ProductDescriptionInput>,
    pub marketing: Vec<ProductMarketingInput>,
}

fn text_field(record: &ProcessedRecord, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(FieldValue::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn bool_field(record: &ProcessedRecord, field: &str, default: bool) -> bool {
    record.get(field).and_then(FieldValue::as_bool).unwrap_or(default)
}

impl DestinationRecord for ProductImport {
    fn from_processed(record: &ProcessedRecord) -> Result<Self> {
        let part_number = text_field(record, "part_number")
            .ok_or_else(|| AppError::validation("part_number is required"))?;
        let part_number_stripped = text_field(record, "part_number_stripped")
            .unwrap_or_else(|| crate::sync::processor::normalize_part_number(&part_number));
        Ok(Self {
            part_number,
            part_number_stripped,
            application: text_field(record, "application"),
            vintage: bool_field(record, "vintage", false),
            late_model: bool_field(record, "late_model", false),
            soft: bool_field(record, "soft", false),
            universal: bool_field(record, "universal", false),
            is_active: bool_field(record, "is_active", true),
            descriptions: Vec::new(),
            marketing: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MeasurementImport {
    pub product_id: Uuid,
    pub manufacturer_id: Option<Uuid>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub volume: Option<f64>,
    pub dimensional_weight: Option<f64>,
}

fn uuid_field(record: &ProcessedRecord, field: &str) -> Option<Uuid> {
    record.get(field).and_then(FieldValue::as_uuid)
}

fn float_field(record: &ProcessedRecord, field: &str) -> Option<f64> {
    record.get(field).and_then(FieldValue::as_f64)
}

impl DestinationRecord for MeasurementImport {
    fn from_processed(record: &ProcessedRecord) -> Result<Self> {
        Ok(Self {
            product_id: uuid_field(record, "product_id")
                .ok_or_else(|| AppError::validation("product_id is required"))?,
            manufacturer_id: uuid_field(record, "manufacturer_id"),
            length: float_field(record, "length"),
            width: float_field(record, "width"),
            height: float_field(record, "height"),
            weight: float_field(record, "weight"),
            volume: float_field(record, "volume"),
            dimensional_weight: float_field(record, "dimensional_weight"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StockImport {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
}

impl DestinationRecord for StockImport {
    fn from_processed(record: &ProcessedRecord) -> Result<Self> {
        Ok(Self {
            product_id: uuid_field(record, "product_id")
                .ok_or_else(|| AppError::validation("product_id is required"))?,
            warehouse_id: uuid_field(record, "warehouse_id")
                .ok_or_else(|| AppError::validation("warehouse_id is required"))?,
            quantity: record
                .get("quantity")
                .and_then(FieldValue::as_i64)
                .ok_or_else(|| AppError::validation("quantity is required"))?
                .max(0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PricingImport {
    pub product_id: Uuid,
    pub price_type_id: Uuid,
    pub manufacturer_id: Option<Uuid>,
    pub price: f64,
    pub currency: String,
}

impl DestinationRecord for PricingImport {
    fn from_processed(record: &ProcessedRecord) -> Result<Self> {
        Ok(Self {
            product_id: uuid_field(record, "product_id")
                .ok_or_else(|| AppError::validation("product_id is required"))?,
            price_type_id: uuid_field(record, "price_type_id")
                .ok_or_else(|| AppError::validation("price_type_id is required"))?,
            manufacturer_id: uuid_field(record, "manufacturer_id"),
            price: float_field(record, "price")
                .ok_or_else(|| AppError::validation("price is required"))?,
            currency: text_field(record, "currency").unwrap_or_else(|| "USD".to_string()),
        })
    }
}

// ============================================================================
// Importer contract
// ============================================================================

/// Result envelope of one importer batch. Created, updated, and errored
/// records partition the input.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub success: bool,
    pub created: u64,
    pub updated: u64,
    pub errors: u64,
    pub total: u64,
    pub error_details: Vec<RecordError>,
}

impl ImportOutcome {
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Importer<T: Send>: Send + Sync {
    async fn import(&self, records: Vec<T>) -> Result<ImportOutcome>;
}

// ============================================================================
// Product importer
// ============================================================================

pub struct ProductImporter {
    store: Arc<CatalogStore>,
}

impl ProductImporter {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Importer<ProductImport> for ProductImporter {
    async fn import(&self, records: Vec<ProductImport>) -> Result<ImportOutcome> {
        // Zero records never opens a write section.
        if records.is_empty() {
            return Ok(ImportOutcome::empty());
        }

        let total = records.len() as u64;
        let mut created = 0u64;
        let mut updated = 0u64;

        let mut tables = self.store.tables.write();
        let existing: HashMap<String, Uuid> = tables
            .products
            .values()
            .filter(|p| !p.is_deleted)
            .map(|p| (p.part_number.clone(), p.id))
            .collect();

        for record in records {
            let now = Utc::now();
            let product_id = match existing.get(&record.part_number) {
                Some(id) => {
                    let product = tables.products.get_mut(id).expect("existing id");
                    product.part_number_stripped = record.part_number_stripped.clone();
                    product.application = record.application.clone();
                    product.vintage = record.vintage;
                    product.late_model = record.late_model;
                    product.soft = record.soft;
                    product.universal = record.universal;
                    product.is_active = record.is_active;
                    product.updated_at = now;
                    updated += 1;
                    *id
                }
                None => {
                    let product = ProductRow {
                        id: Uuid::new_v4(),
                        part_number: record.part_number.clone(),
                        part_number_stripped: record.part_number_stripped.clone(),
                        application: record.application.clone(),
                        vintage: record.vintage,
                        late_model: record.late_model,
                        soft: record.soft,
                        universal: record.universal,
                        is_active: record.is_active,
                        is_deleted: false,
                        created_at: now,
                        updated_at: now,
                    };
                    let id = product.id;
                    tables.products.insert(id, product);
                    created += 1;
                    id
                }
            };

            // The payload is the source of truth for the child tables.
            if !record.descriptions.is_empty() {
                tables.descriptions.retain(|d| d.product_id != product_id);
                for input in &record.descriptions {
                    tables.descriptions.push(ProductDescriptionRow {
                        id: Uuid::new_v4(),
                        product_id,
                        description_type: input.description_type.clone(),
                        description: input.description.clone(),
                    });
                }
            }
            if !record.marketing.is_empty() {
                tables.marketing.retain(|m| m.product_id != product_id);
                for input in &record.marketing {
                    tables.marketing.push(ProductMarketingRow {
                        id: Uuid::new_v4(),
                        product_id,
                        marketing_type: input.marketing_type.clone(),
                        content: input.content.clone(),
                        position: input.position,
                    });
                }
            }
        }
        drop(tables);

        tracing::info!(created, updated, errors = 0u64, "product import complete");
        Ok(ImportOutcome {
            success: true,
            created,
            updated,
            errors: 0,
            total,
            error_details: Vec::new(),
        })
    }
}

// ============================================================================
// Measurement importer
// ============================================================================

pub struct MeasurementImporter {
    store: Arc<CatalogStore>,
}

impl MeasurementImporter {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Importer<MeasurementImport> for MeasurementImporter {
    async fn import(&self, records: Vec<MeasurementImport>) -> Result<ImportOutcome> {
        if records.is_empty() {
            return Ok(ImportOutcome::empty());
        }

        let total = records.len() as u64;
        let mut created = 0u64;
        let mut updated = 0u64;
        let mut error_details = Vec::new();

        let mut tables = self.store.tables.write();
        for (index, record) in records.into_iter().enumerate() {
            if !tables.products.contains_key(&record.product_id) {
                error_details.push(RecordError::new(
                    index,
                    Some(record.product_id.to_string()),
                    "Product does not exist",
                ));
                continue;
            }

            let now = Utc::now();
            match tables.measurements.iter_mut().find(|m| {
                m.product_id == record.product_id && m.manufacturer_id == record.manufacturer_id
            }) {
                Some(existing) => {
                    existing.length = record.length;
                    existing.width = record.width;
                    existing.height = record.height;
                    existing.weight = record.weight;
                    existing.volume = record.volume;
                    existing.dimensional_weight = record.dimensional_weight;
                    existing.effective_date = now;
                    updated += 1;
                }
                None => {
                    tables.measurements.push(ProductMeasurementRow {
                        id: Uuid::new_v4(),
                        product_id: record.product_id,
                        manufacturer_id: record.manufacturer_id,
                        length: record.length,
                        width: record.width,
                        height: record.height,
                        weight: record.weight,
                        volume: record.volume,
                        dimensional_weight: record.dimensional_weight,
                        effective_date: now,
                    });
                    created += 1;
                }
            }
        }
        drop(tables);

        let errors = error_details.len() as u64;
        tracing::info!(created, updated, errors, "measurement import complete");
        Ok(ImportOutcome {
            success: errors == 0,
            created,
            updated,
            errors,
            total,
            error_details,
        })
    }
}

// ============================================================================
// Stock importer
// ============================================================================

pub struct StockImporter {
    store: Arc<CatalogStore>,
}

impl StockImporter {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Importer<StockImport> for StockImporter {
    async fn import(&self, records: Vec<StockImport>) -> Result<ImportOutcome> {
        if records.is_empty() {
            return Ok(ImportOutcome::empty());
        }

        let total = records.len() as u64;
        let mut created = 0u64;
        let mut updated = 0u64;
        let mut error_details = Vec::new();

        let mut tables = self.store.tables.write();
        for (index, record) in records.into_iter().enumerate() {
            if !tables.products.contains_key(&record.product_id) {
                error_details.push(RecordError::new(
                    index,
                    Some(record.product_id.to_string()),
                    "Product does not exist",
                ));
                continue;
            }
            if !tables.warehouses.contains_key(&record.warehouse_id) {
                error_details.push(RecordError::new(
                    index,
                    Some(record.product_id.to_string()),
                    "Warehouse does not exist",
                ));
                continue;
            }

            let now = Utc::now();
            match tables.stock.iter_mut().find(|s| {
                s.product_id == record.product_id && s.warehouse_id == record.warehouse_id
            }) {
                Some(existing) => {
                    existing.quantity = record.quantity;
                    existing.last_updated = now;
                    updated += 1;
                }
                None => {
                    tables.stock.push(ProductStockRow {
                        id: Uuid::new_v4(),
                        product_id: record.product_id,
                        warehouse_id: record.warehouse_id,
                        quantity: record.quantity,
                        last_updated: now,
                    });
                    created += 1;
                }
            }
        }
        drop(tables);

        let errors = error_details.len() as u64;
        tracing::info!(created, updated, errors, "stock import complete");
        Ok(ImportOutcome {
            success: errors == 0,
            created,
            updated,
            errors,
            total,
            error_details,
        })
    }
}

// ============================================================================
// Pricing importer
// ============================================================================

pub struct PricingImporter {
    store: Arc<CatalogStore>,
}

impl PricingImporter {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Importer<PricingImport> for PricingImporter {
    async fn import(&self, records: Vec<PricingImport>) -> Result<ImportOutcome> {
        if records.is_empty() {
            return Ok(ImportOutcome::empty());
        }

        let total = records.len() as u64;
        let mut created = 0u64;
        let mut updated = 0u64;
        let mut error_details = Vec::new();

        let default_currency = self.store.default_currency();
        let known: Vec<String> = self
            .store
            .known_currencies()
            .into_iter()
            .map(|c| c.code)
            .collect();

        let mut tables = self.store.tables.write();
        for (index, record) in records.into_iter().enumerate() {
            if !tables.products.contains_key(&record.product_id) {
                error_details.push(RecordError::new(
                    index,
                    Some(record.product_id.to_string()),
                    "Product does not exist",
                ));
                continue;
            }
            if !tables.price_types.contains_key(&record.price_type_id) {
                error_details.push(RecordError::new(
                    index,
                    Some(record.product_id.to_string()),
                    "Price type does not exist",
                ));
                continue;
            }

            let mut currency = record.currency.clone();
            if !known.is_empty() && !known.contains(&currency) {
                if let Some(fallback) = &default_currency {
                    tracing::warn!(
                        currency = %currency,
                        fallback = %fallback,
                        "unknown currency, using default"
                    );
                    currency = fallback.clone();
                }
            }

            let now = Utc::now();
            match tables.pricing.iter_mut().find(|p| {
                p.product_id == record.product_id
                    && p.price_type_id == record.price_type_id
                    && p.manufacturer_id == record.manufacturer_id
            }) {
                Some(existing) => {
                    existing.price = record.price;
                    existing.currency = currency;
                    existing.last_updated = now;
                    updated += 1;
                }
                None => {
                    tables.pricing.push(ProductPricingRow {
                        id: Uuid::new_v4(),
                        product_id: record.product_id,
                        price_type_id: record.price_type_id,
                        manufacturer_id: record.manufacturer_id,
                        price: record.price,
                        currency,
                        last_updated: now,
                    });
                    created += 1;
                }
            }
        }
        drop(tables);

        let errors = error_details.len() as u64;
        tracing::info!(created, updated, errors, "pricing import complete");
        Ok(ImportOutcome {
            success: errors == 0,
            created,
            updated,
            errors,
            total,
            error_details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(part_number: &str) -> ProductImport {
        ProductImport {
            part_number: part_number.to_string(),
            part_number_stripped: crate::sync::processor::normalize_part_number(part_number),
            application: Some("Universal bracket".to_string()),
            vintage: false,
            late_model: true,
            soft: false,
            universal: true,
            is_active: true,
            descriptions: vec![ProductDescriptionInput {
                description_type: "short".to_string(),
                description: format!("{} bracket", part_number),
            }],
            marketing: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_import_zero_records() {
        let store = Arc::new(CatalogStore::new());
        let importer = ProductImporter::new(store);
        let outcome = importer.import(Vec::new()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.created + outcome.updated + outcome.errors, 0);
    }

    #[tokio::test]
    async fn test_product_import_idempotent() {
        let store = Arc::new(CatalogStore::new());
        let importer = ProductImporter::new(store.clone());
        let batch: Vec<ProductImport> = (0..100).map(|i| product(&format!("AB-{}", i))).collect();

        let first = importer.import(batch.clone()).await.unwrap();
        assert_eq!(first.created, 100);
        assert_eq!(first.updated, 0);
        assert_eq!(first.errors, 0);

        let ids_before: HashMap<String, Uuid> = store.product_id_map();

        let second = importer.import(batch.clone()).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 100);
        assert_eq!(second.errors, 0);

        let third = importer.import(batch).await.unwrap();
        assert_eq!(third.created, 0);
        assert_eq!(third.updated, 100);

        // Surrogate keys are stable across re-imports.
        assert_eq!(store.product_id_map(), ids_before);
        assert_eq!(store.product_count(), 100);
    }

    #[tokio::test]
    async fn test_child_tables_replaced_from_payload() {
        let store = Arc::new(CatalogStore::new());
        let importer = ProductImporter::new(store.clone());

        importer.import(vec![product("AB-1")]).await.unwrap();
        let id = store.product_by_part_number("AB-1").unwrap().id;
        assert_eq!(store.descriptions_for(id).len(), 1);

        let mut replacement = product("AB-1");
        replacement.descriptions = vec![
            ProductDescriptionInput {
                description_type: "short".to_string(),
                description: "new short".to_string(),
            },
            ProductDescriptionInput {
                description_type: "long".to_string(),
                description: "new long".to_string(),
            },
        ];
        importer.import(vec![replacement]).await.unwrap();

        let descriptions = store.descriptions_for(id);
        assert_eq!(descriptions.len(), 2);
        assert!(descriptions.iter().all(|d| d.description.starts_with("new")));
    }

    #[tokio::test]
    async fn test_stock_missing_parent_is_record_error() {
        let store = Arc::new(CatalogStore::new());
        let warehouse = store.add_warehouse("MAIN");
        ProductImporter::new(store.clone())
            .import(vec![product("AB-1")])
            .await
            .unwrap();
        let product_id = store.product_by_part_number("AB-1").unwrap().id;

        let importer = StockImporter::new(store.clone());
        let outcome = importer
            .import(vec![
                StockImport {
                    product_id,
                    warehouse_id: warehouse,
                    quantity: 5,
                },
                StockImport {
                    product_id: Uuid::new_v4(),
                    warehouse_id: warehouse,
                    quantity: 9,
                },
            ])
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.error_details[0].index, 1);
        // Created + updated + errors partition the batch.
        assert_eq!(
            outcome.created + outcome.updated + outcome.errors,
            outcome.total
        );
    }

    #[tokio::test]
    async fn test_stock_update_by_natural_key() {
        let store = Arc::new(CatalogStore::new());
        let warehouse = store.add_warehouse("MAIN");
        ProductImporter::new(store.clone())
            .import(vec![product("AB-1")])
            .await
            .unwrap();
        let product_id = store.product_by_part_number("AB-1").unwrap().id;

        let importer = StockImporter::new(store.clone());
        let entry = StockImport {
            product_id,
            warehouse_id: warehouse,
            quantity: 5,
        };
        importer.import(vec![entry.clone()]).await.unwrap();
        let outcome = importer
            .import(vec![StockImport {
                quantity: 7,
                ..entry
            }])
            .await
            .unwrap();

        assert_eq!(outcome.updated, 1);
        let rows = store.stock_for(product_id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 7);
    }

    #[tokio::test]
    async fn test_pricing_unknown_currency_falls_back() {
        let store = Arc::new(CatalogStore::new());
        store.add_currency("USD", true);
        let price_type = store.add_price_type("LIST");
        ProductImporter::new(store.clone())
            .import(vec![product("AB-1")])
            .await
            .unwrap();
        let product_id = store.product_by_part_number("AB-1").unwrap().id;

        let importer = PricingImporter::new(store.clone());
        importer
            .import(vec![PricingImport {
                product_id,
                price_type_id: price_type,
                manufacturer_id: None,
                price: 19.95,
                currency: "ZZZ".to_string(),
            }])
            .await
            .unwrap();

        let rows = store.pricing_for(product_id);
        assert_eq!(rows[0].currency, "USD");
    }

    #[tokio::test]
    async fn test_measurement_upsert() {
        let store = Arc::new(CatalogStore::new());
        ProductImporter::new(store.clone())
            .import(vec![product("AB-1")])
            .await
            .unwrap();
        let product_id = store.product_by_part_number("AB-1").unwrap().id;

        let importer = MeasurementImporter::new(store.clone());
        let entry = MeasurementImport {
            product_id,
            manufacturer_id: None,
            length: Some(10.0),
            width: Some(4.0),
            height: None,
            weight: Some(1.5),
            volume: None,
            dimensional_weight: None,
        };
        let first = importer.import(vec![entry.clone()]).await.unwrap();
        assert_eq!(first.created, 1);

        let second = importer
            .import(vec![MeasurementImport {
                length: Some(11.0),
                ..entry
            }])
            .await
            .unwrap();
        assert_eq!(second.updated, 1);
        let rows = store.measurements_for(product_id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].length, Some(11.0));
    }
}
