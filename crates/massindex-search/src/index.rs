//! Index directory and writer/reader factories.

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_index_schema, IndexSchema};

const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Tantivy refuses writer budgets below 15MB per thread
const MIN_MEMORY_PER_THREAD_MB: usize = 15;

const META_FILE: &str = "meta.json";

#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub index_path: PathBuf,
    /// Total writer heap, shared by all indexing threads
    pub writer_memory_mb: usize,
    /// Writer threads; Tantivy picks a count from the CPUs when unset
    pub writer_threads: Option<usize>,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self::new("./index")
    }
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
            writer_threads: None,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    pub fn with_writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = Some(threads.max(1));
        self
    }

    /// Writer heap in bytes, raised to the per-thread minimum.
    fn writer_budget_bytes(&self) -> usize {
        let threads = self.writer_threads.unwrap_or(1);
        self.writer_memory_mb.max(threads * MIN_MEMORY_PER_THREAD_MB) * 1024 * 1024
    }
}

/// The entity index on disk together with its resolved schema.
pub struct SearchIndex {
    index: Index,
    schema: IndexSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open the index under the configured path, creating it when the
    /// directory holds none. An existing index without the entity fields is
    /// rejected with `SchemaMismatch`.
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = open_or_create_index(&config.index_path)?;
        let schema = IndexSchema::from_schema(index.schema())?;
        info!(path = ?config.index_path, "Opened entity index");
        Ok(Self {
            index,
            schema,
            config,
        })
    }

    /// Whether `path` already contains an index.
    pub fn is_present(path: &Path) -> bool {
        path.join(META_FILE).exists()
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// A writer sized from the config. Only one may exist per index.
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let budget = self.config.writer_budget_bytes();
        let writer = match self.config.writer_threads {
            Some(threads) => self.index.writer_with_num_threads(threads, budget)?,
            None => self.index.writer(budget)?,
        };
        debug!(
            budget_mb = budget / (1024 * 1024),
            threads = ?self.config.writer_threads,
            "Created index writer"
        );
        Ok(writer)
    }

    /// A reader that only sees new commits after `reload()`.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        Ok(self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }

    pub fn path(&self) -> &Path {
        &self.config.index_path
    }
}

/// Open the index in `path` or create an empty entity index there.
pub fn open_or_create_index(path: &Path) -> Result<Index, SearchError> {
    if SearchIndex::is_present(path) {
        debug!(path = ?path, "Opening existing index");
        return Ok(Index::open_in_dir(path)?);
    }
    info!(path = ?path, "Creating entity index");
    std::fs::create_dir_all(path)?;
    Ok(Index::create_in_dir(
        path,
        build_index_schema().schema().clone(),
    )?)
}
