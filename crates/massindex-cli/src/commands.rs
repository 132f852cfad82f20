//! Command implementations for the mass indexer.
//!
//! Handles:
//! - run: Load config, open storage and index, run the job until done or Ctrl+C
//! - status: Print stored jobs and their partition checkpoints
//! - import: Load JSON Lines records into the record store

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use massindex_core::{
    CheckpointStore, LoggingProgressMonitor, MassIndexingJob, SearchIndexSink,
    StorageCheckpointStore, StorageSource, StoreRegistry,
};
use massindex_search::{IndexSearcher, SearchIndex, SearchIndexConfig, SearchIndexer};
use massindex_storage::Storage;
use massindex_types::{EntityType, JobStatus, Record, Settings};

use crate::cli::RunArgs;

/// Records written per RocksDB batch during import.
const IMPORT_BATCH_SIZE: usize = 1_000;

/// Name the single record store is registered under.
const DEFAULT_STORE: &str = "default";

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

fn open_storage(db_path: &str) -> Result<Storage> {
    let path = Path::new(db_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    info!(path = %db_path, "Opening storage");
    Storage::open(path).context("Failed to open storage")
}

/// Apply `run` flags on top of the loaded settings.
pub fn apply_run_args(settings: &mut Settings, args: &RunArgs) {
    if let Some(db_path) = &args.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(index_path) = &args.index_path {
        settings.index_path = index_path.clone();
    }

    let mut job = settings.job.clone();
    if let Some(types) = &args.entity_types {
        job = job.with_entity_types_csv(types);
    }
    if let Some(name) = &args.job_name {
        job = job.with_job_name(name.clone());
    }
    if let Some(query) = &args.query {
        job = job.with_custom_query(query.clone());
    }
    if let Some(criteria) = &args.criteria {
        job = job.with_criteria(criteria.clone());
    }
    if let Some(rows) = args.rows_per_partition {
        job = job.with_rows_per_partition(rows);
    }
    if args.max_threads.is_some() {
        job.max_threads = args.max_threads;
    }
    if args.no_purge {
        job = job.with_purge(false);
    }
    settings.job = job;
}

/// Run a mass-indexing job.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open RocksDB storage and the Tantivy index
/// 3. Run the job on a blocking thread
/// 4. On Ctrl+C, request a stop and wait for in-flight chunks
pub async fn run_job(
    config_path: Option<&str>,
    log_level: Option<&str>,
    args: RunArgs,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    apply_run_args(&mut settings, &args);
    init_logging(&settings.log_level)?;

    info!("Mass indexer starting...");
    info!("  Database path: {}", settings.db_path);
    info!("  Index path: {}", settings.index_path);
    info!("  Job: {}", settings.job.job_name);

    let storage = Arc::new(open_storage(&settings.db_path)?);
    let index = SearchIndex::open_or_create(
        SearchIndexConfig::new(&settings.index_path).with_memory_mb(settings.writer_memory_mb),
    )
    .context("Failed to open search index")?;
    let indexer = SearchIndexer::new(&index).context("Failed to create index writer")?;

    let checkpoints = Arc::new(StorageCheckpointStore::new(storage.clone()));
    if args.restart_fresh {
        warn!(job = %settings.job.job_name, "Discarding stored job state");
        checkpoints
            .clear_job(&settings.job.job_name)
            .context("Failed to clear job state")?;
    }

    let stores = StoreRegistry::single(DEFAULT_STORE, Arc::new(StorageSource::new(storage)));
    let job = MassIndexingJob::new(
        settings.job.clone(),
        Arc::new(stores),
        Arc::new(SearchIndexSink::new(indexer)),
        checkpoints,
    )
    .with_monitor(Arc::new(LoggingProgressMonitor::default()));
    let stop = job.stop_signal();

    let mut handle = tokio::task::spawn_blocking(move || job.run());
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping after in-flight chunks...");
            stop.request_stop();
            handle.await
        }
    };
    let report = joined
        .context("Indexing task panicked")?
        .context("Mass indexing job could not start")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.status {
        JobStatus::Failed => bail!(
            "Job {} failed: {}",
            report.job_name,
            report.error.as_deref().unwrap_or("one or more partitions failed")
        ),
        JobStatus::Stopped => {
            println!(
                "Job {} stopped; run it again with the same job name to resume",
                report.job_name
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Show stored jobs and their partitions.
pub fn show_status(
    config_path: Option<&str>,
    log_level: Option<&str>,
    job_name: Option<&str>,
    db_path: Option<&str>,
    index_path: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    if let Some(index_path) = index_path {
        settings.index_path = index_path.to_string();
    }

    let storage = open_storage(&settings.db_path)?;
    let jobs = match job_name {
        Some(name) => storage.get_job(name)?.into_iter().collect(),
        None => storage.list_jobs()?,
    };

    if jobs.is_empty() {
        println!("No jobs found");
    }
    for job in &jobs {
        println!(
            "{} [{}] execution={} restarts={} types={}",
            job.job_name,
            job.status,
            job.execution_id,
            job.restart_count,
            job.entity_types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        for record in storage.list_checkpoints(&job.job_name)? {
            println!(
                "  {:<24} {:<12} chunk={:<6} read={} indexed={} skipped={} filtered={}",
                record.partition_id.to_string(),
                record.status.to_string(),
                record.last_committed_chunk,
                record.counts.read,
                record.counts.indexed,
                record.counts.skipped,
                record.counts.filtered
            );
        }
    }

    let stats = storage.get_stats()?;
    println!("Records: {}", stats.record_count);
    if SearchIndex::is_present(Path::new(&settings.index_path)) {
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(&settings.index_path))?;
        let searcher = IndexSearcher::new(&index)?;
        println!("Indexed documents: {}", searcher.count_all()?);
    }
    Ok(())
}

/// Parse one JSON Lines record; the `id` field becomes the primary key.
pub fn parse_record(entity_type: &EntityType, line: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(line).context("Invalid JSON")?;
    let Value::Object(mut fields) = value else {
        bail!("Expected a JSON object");
    };
    let key = fields
        .remove("id")
        .and_then(|id| id.as_u64())
        .context("Missing or non-numeric id")?;
    let mut record = Record::new(entity_type.clone(), key);
    record.fields = fields;
    Ok(record)
}

/// Import records from a JSON Lines file.
pub fn import_records(
    config_path: Option<&str>,
    log_level: Option<&str>,
    entity_type: &str,
    file: &str,
    db_path: Option<&str>,
) -> Result<usize> {
    let mut settings = load_settings(config_path, log_level)?;
    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    let entity_type = EntityType::new(entity_type)?;
    let storage = open_storage(&settings.db_path)?;
    let reader = BufReader::new(File::open(file).with_context(|| format!("Failed to open {}", file))?);

    let mut batch = Vec::with_capacity(IMPORT_BATCH_SIZE);
    let mut imported = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&entity_type, &line)
            .with_context(|| format!("{}:{}", file, number + 1))?;
        batch.push(record);
        if batch.len() == IMPORT_BATCH_SIZE {
            imported += storage.put_records(&batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        imported += storage.put_records(&batch)?;
    }

    println!("Imported {} {} records", imported, entity_type);
    Ok(imported)
}
