//! End-to-end test infrastructure for the mass indexer.
//!
//! Provides a shared TestHarness (RocksDB record store plus Tantivy index in
//! a temp dir) and helpers for seeding records and observing a job.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use massindex_core::{
    MassIndexingJob, ProgressEvent, ProgressMonitor, SearchIndexSink, StopSignal,
    StorageCheckpointStore, StorageSource, StoreRegistry, TENANT_FIELD,
};
use massindex_search::{IndexSearcher, SearchIndex, SearchIndexConfig, SearchIndexer};
use massindex_storage::Storage;
use massindex_types::{EntityType, IndexDocument, JobParameters, PrimaryKey, Record};

const GENRES: [&str; 4] = ["scifi", "fantasy", "history", "poetry"];

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Record store and job state
    pub storage: Arc<Storage>,
    pub index: SearchIndex,
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with temp directory, storage and index.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let index_path = temp_dir.path().join("index");
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(&index_path))
            .expect("Failed to open test index");

        Self {
            _temp_dir: temp_dir,
            storage,
            index,
            index_path,
        }
    }

    /// A job over this harness's store, index and checkpoint column families.
    ///
    /// Drop the job before creating another one; the index allows a single writer.
    pub fn job(&self, params: JobParameters) -> MassIndexingJob {
        let source = Arc::new(StorageSource::new(self.storage.clone()));
        let indexer = SearchIndexer::new(&self.index).expect("Failed to create index writer");
        MassIndexingJob::new(
            params,
            Arc::new(StoreRegistry::single("default", source)),
            Arc::new(SearchIndexSink::new(indexer)),
            Arc::new(StorageCheckpointStore::new(self.storage.clone())),
        )
    }

    pub fn searcher(&self) -> IndexSearcher {
        let searcher = IndexSearcher::new(&self.index).expect("Failed to open searcher");
        searcher.reload().expect("Failed to reload searcher");
        searcher
    }

    pub fn indexed_count(&self, entity_type: &EntityType) -> u64 {
        self.searcher()
            .count_type(entity_type)
            .expect("Failed to count documents")
    }

    /// Write documents straight into the index, bypassing the job.
    pub fn index_documents(&self, documents: &[IndexDocument]) {
        let indexer = SearchIndexer::new(&self.index).expect("Failed to create index writer");
        indexer.add_documents(documents).expect("Failed to add documents");
        indexer.commit().expect("Failed to commit");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn entity(name: &str) -> EntityType {
    EntityType::new(name).expect("Invalid entity type")
}

/// Deterministic record for `key`: title, genre cycling through four
/// values, year and a tenant (`acme` for every third key).
pub fn sample_record(entity_type: &EntityType, key: PrimaryKey) -> Record {
    Record::new(entity_type.clone(), key)
        .with_field("title", format!("{} number {}", entity_type, key))
        .with_field("genre", GENRES[(key % GENRES.len() as u64) as usize])
        .with_field("year", 1900 + key % 120)
        .with_field(TENANT_FIELD, if key % 3 == 0 { "acme" } else { "globex" })
}

/// Store sample records for every key.
pub fn seed_records(storage: &Storage, entity_type: &EntityType, keys: impl IntoIterator<Item = PrimaryKey>) {
    let records: Vec<Record> = keys
        .into_iter()
        .map(|key| sample_record(entity_type, key))
        .collect();
    for batch in records.chunks(5_000) {
        storage.put_records(batch).expect("Failed to put records");
    }
}

/// A document that looks like a leftover from an earlier indexing run.
pub fn stale_document(entity_type: &EntityType, key: PrimaryKey, tenant: Option<&str>) -> IndexDocument {
    IndexDocument {
        entity_type: entity_type.clone(),
        doc_id: IndexDocument::doc_id_for(entity_type, key),
        tenant_id: tenant.map(str::to_string),
        text: "stale leftover".to_string(),
        payload: "{}".to_string(),
    }
}

/// Monitor that keeps every event in order.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Chunks committed in this log, in order.
    pub fn committed_chunks(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::ChunkCommitted { chunk, .. } => Some(chunk),
                _ => None,
            })
            .collect()
    }
}

impl ProgressMonitor for EventLog {
    fn on_event(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Monitor that requests a stop once a given chunk has been committed,
/// simulating an operator interrupt between chunks.
pub struct StopAfterChunk {
    pub stop: StopSignal,
    pub chunk: u32,
    pub log: EventLog,
}

impl StopAfterChunk {
    pub fn new(stop: StopSignal, chunk: u32) -> Self {
        Self {
            stop,
            chunk,
            log: EventLog::default(),
        }
    }
}

impl ProgressMonitor for StopAfterChunk {
    fn on_event(&self, event: &ProgressEvent) {
        if let ProgressEvent::ChunkCommitted { chunk, .. } = event {
            if *chunk == self.chunk {
                self.stop.request_stop();
            }
        }
        self.log.on_event(event);
    }
}
