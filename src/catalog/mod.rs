// # Catalog Store
//
// Primary-store rows the sync importers upsert into: products with their
// dependent description/marketing tables, measurements, stock, and pricing,
// plus the reference tables importers resolve against (warehouses, price
// types, currencies).
//
// Tables live behind one write lock so an importer batch applies as a unit:
// a batch is planned against a read snapshot and committed with a single
// write section, or not at all.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: Uuid,
    pub part_number: String,
    pub part_number_stripped: String,
    pub application: Option<String>,
    pub vintage: bool,
    pub late_model: bool,
    pub soft: bool,
    pub universal: bool,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDescriptionRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub description_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMarketingRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub marketing_type: String,
    pub content: String,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMeasurementRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub manufacturer_id: Option<Uuid>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub volume: Option<f64>,
    pub dimensional_weight: Option<f64>,
    pub effective_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStockRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductPricingRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub price_type_id: Uuid,
    pub manufacturer_id: Option<Uuid>,
    pub price: f64,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTypeRow {
    pub id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyRow {
    pub code: String,
    pub is_base: bool,
}

#[derive(Default)]
pub(crate) struct CatalogTables {
    pub products: HashMap<Uuid, ProductRow>,
    pub descriptions: Vec<ProductDescriptionRow>,
    pub marketing: Vec<ProductMarketingRow>,
    pub measurements: Vec<ProductMeasurementRow>,
    pub stock: Vec<ProductStockRow>,
    pub pricing: Vec<ProductPricingRow>,
    pub warehouses: HashMap<Uuid, WarehouseRow>,
    pub price_types: HashMap<Uuid, PriceTypeRow>,
    pub currencies: Vec<CurrencyRow>,
}

#[derive(Default)]
pub struct CatalogStore {
    pub(crate) tables: RwLock<CatalogTables>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `part_number -> surrogate id` for live products, built once per batch
    /// by parent-resolving processors.
    pub fn product_id_map(&self) -> HashMap<String, Uuid> {
        self.tables
            .read()
            .products
            .values()
            .filter(|p| !p.is_deleted)
            .map(|p| (p.part_number.clone(), p.id))
            .collect()
    }

    /// `warehouse name -> id` for active warehouses.
    pub fn warehouse_id_map(&self) -> HashMap<String, Uuid> {
        self.tables
            .read()
            .warehouses
            .values()
            .filter(|w| w.is_active)
            .map(|w| (w.name.clone(), w.id))
            .collect()
    }

    pub fn price_type_id_map(&self) -> HashMap<String, Uuid> {
        self.tables
            .read()
            .price_types
            .values()
            .map(|t| (t.code.clone(), t.id))
            .collect()
    }

    pub fn known_currencies(&self) -> Vec<CurrencyRow> {
        self.tables.read().currencies.clone()
    }

    pub fn default_currency(&self) -> Option<String> {
        let tables = self.tables.read();
        if tables.currencies.iter().any(|c| c.code == "USD") {
            return Some("USD".to_string());
        }
        tables
            .currencies
            .iter()
            .find(|c| c.is_base)
            .map(|c| c.code.clone())
    }

    pub fn product_count(&self) -> usize {
        self.tables
            .read()
            .products
            .values()
            .filter(|p| !p.is_deleted)
            .count()
    }

    pub fn product_by_part_number(&self, part_number: &str) -> Option<ProductRow> {
        self.tables
            .read()
            .products
            .values()
            .find(|p| p.part_number == part_number && !p.is_deleted)
            .cloned()
    }

    pub fn descriptions_for(&self, product_id: Uuid) -> Vec<ProductDescriptionRow> {
        self.tables
            .read()
            .descriptions
            .iter()
            .filter(|d| d.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn marketing_for(&self, product_id: Uuid) -> Vec<ProductMarketingRow> {
        self.tables
            .read()
            .marketing
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn stock_for(&self, product_id: Uuid) -> Vec<ProductStockRow> {
        self.tables
            .read()
            .stock
            .iter()
            .filter(|s| s.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn measurements_for(&self, product_id: Uuid) -> Vec<ProductMeasurementRow> {
        self.tables
            .read()
            .measurements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn pricing_for(&self, product_id: Uuid) -> Vec<ProductPricingRow> {
        self.tables
            .read()
            .pricing
            .iter()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect()
    }

    // Reference-data seeding, used by setup and tests.

    pub fn add_warehouse(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.write().warehouses.insert(
            id,
            WarehouseRow {
                id,
                name: name.to_string(),
                is_active: true,
            },
        );
        id
    }

    pub fn add_price_type(&self, code: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.write().price_types.insert(
            id,
            PriceTypeRow {
                id,
                code: code.to_string(),
            },
        );
        id
    }

    pub fn add_currency(&self, code: &str, is_base: bool) {
        self.tables.write().currencies.push(CurrencyRow {
            code: code.to_string(),
            is_base,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_maps() {
        let store = CatalogStore::new();
        let wh = store.add_warehouse("MAIN");
        let pt = store.add_price_type("LIST");
        store.add_currency("USD", true);

        assert_eq!(store.warehouse_id_map().get("MAIN"), Some(&wh));
        assert_eq!(store.price_type_id_map().get("LIST"), Some(&pt));
        assert_eq!(store.default_currency().as_deref(), Some("USD"));
    }

    #[test]
    fn test_default_currency_falls_back_to_base() {
        let store = CatalogStore::new();
        store.add_currency("EUR", true);
        store.add_currency("GBP", false);
        assert_eq!(store.default_currency().as_deref(), Some("EUR"));
    }

    #[test]
    fn test_empty_store() {
        let store = CatalogStore::new();
        assert_eq!(store.product_count(), 0);
        assert!(store.product_by_part_number("AB123").is_none());
        assert!(store.default_currency().is_none());
    }
}
