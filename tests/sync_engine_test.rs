// End-to-end sync engine scenarios against the file connector and the
// catalog store.

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;

use partgrid::catalog::CatalogStore;
use partgrid::sync::{
    product_processor, stock_processor, FileConnector, FileFormat, Importer, Pipeline,
    ProductImport, ProductImporter, StockImport, StockImporter,
};

fn product_csv(rows: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "PRDNUM,PRDDESC,UNIVRSL_FLAG,IS_ACTIVE").unwrap();
    for i in 0..rows {
        writeln!(file, "AB-{:04},Bracket {},Y,Y", i, i).unwrap();
    }
    file.flush().unwrap();
    file
}

fn product_pipeline(file: &NamedTempFile, store: &Arc<CatalogStore>) -> Pipeline<ProductImport> {
    let importer: Arc<dyn Importer<ProductImport>> = Arc::new(ProductImporter::new(store.clone()));
    Pipeline::new(
        Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
        product_processor(),
        importer,
    )
    .with_chunk_size(100)
}

#[tokio::test]
async fn test_sync_idempotence_over_fixed_extract() {
    let file = product_csv(1000);
    let store = Arc::new(CatalogStore::new());

    // First run creates everything.
    let first = product_pipeline(&file, &store).run("", None).await;
    assert!(first.success, "{}", first.message);
    assert_eq!(first.records_created, 1000);
    assert_eq!(first.records_updated, 0);
    assert_eq!(first.records_with_errors, 0);

    let ids_after_first = store.product_id_map();

    // Second run with no source changes: created=0, updated=1000.
    let second = product_pipeline(&file, &store).run("", None).await;
    assert_eq!(second.records_created, 0);
    assert_eq!(second.records_updated, 1000);
    assert_eq!(second.records_with_errors, 0);

    // Third run: same counts, same surrogate keys.
    let third = product_pipeline(&file, &store).run("", None).await;
    assert_eq!(third.records_created, 0);
    assert_eq!(third.records_updated, 1000);
    assert_eq!(store.product_id_map(), ids_after_first);
    assert_eq!(store.product_count(), 1000);
}

#[tokio::test]
async fn test_counters_partition_the_batch() {
    let file = product_csv(50);
    let store = Arc::new(CatalogStore::new());
    let result = product_pipeline(&file, &store).run("", None).await;

    assert_eq!(
        result.records_created + result.records_updated + result.records_with_errors,
        result.records_extracted
    );
}

#[tokio::test]
async fn test_stock_sync_against_seeded_products() {
    // Seed products, then import stock keyed by part number and warehouse
    // code through the parent-resolving processor.
    let products = product_csv(5);
    let store = Arc::new(CatalogStore::new());
    product_pipeline(&products, &store).run("", None).await;
    store.add_warehouse("MAIN");

    let mut stock_file = NamedTempFile::new().unwrap();
    writeln!(stock_file, "PRDNUM,WRHSNUM,QUANTITY").unwrap();
    writeln!(stock_file, "AB-0000,MAIN,12").unwrap();
    writeln!(stock_file, "AB-0001,MAIN,-3").unwrap();
    writeln!(stock_file, "ZZ-MISSING,MAIN,4").unwrap();
    stock_file.flush().unwrap();

    let importer: Arc<dyn Importer<StockImport>> = Arc::new(StockImporter::new(store.clone()));
    let mut pipeline = Pipeline::new(
        Box::new(FileConnector::new(stock_file.path(), FileFormat::Csv)),
        stock_processor(&store),
        importer,
    );
    let result = pipeline.run("", None).await;

    // Two resolve and land; the missing parent is a per-record error.
    assert_eq!(result.records_created, 2);
    assert_eq!(result.records_with_errors, 1);
    assert!(result.error_details[0].message.contains("ZZ-MISSING"));

    let first = store.product_by_part_number("AB-0000").unwrap();
    assert_eq!(store.stock_for(first.id)[0].quantity, 12);
    // Negative quantity clamped to zero.
    let second = store.product_by_part_number("AB-0001").unwrap();
    assert_eq!(store.stock_for(second.id)[0].quantity, 0);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let file = product_csv(25);
    let store = Arc::new(CatalogStore::new());
    let importer: Arc<dyn Importer<ProductImport>> = Arc::new(ProductImporter::new(store.clone()));
    let mut pipeline = Pipeline::new(
        Box::new(FileConnector::new(file.path(), FileFormat::Csv)),
        product_processor(),
        importer,
    )
    .with_dry_run(true);

    let result = pipeline.run("", None).await;
    assert!(result.success);
    assert!(result.dry_run);
    assert_eq!(result.records_validated, 25);
    assert_eq!(store.product_count(), 0);
}

#[tokio::test]
async fn test_extract_limit_bounds_the_run() {
    let file = product_csv(100);
    let store = Arc::new(CatalogStore::new());
    let result = product_pipeline(&file, &store).run("", Some(10)).await;

    assert_eq!(result.records_extracted, 10);
    assert_eq!(store.product_count(), 10);
}
