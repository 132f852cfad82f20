//! Mass-indexing engine.
//!
//! Rebuilds the full-text index for a set of entity types from the record
//! store, in parallel and restartably.
//!
//! ## Key Components
//!
//! - [`ScopeResolver`]: Turns job parameters into an [`IndexingScope`]
//! - [`KeyEnumerator`]: Streams a type's keys in ascending order, page by page
//! - [`PartitionPlanner`]: Slices each type into key-bounded partitions
//! - [`ChunkProcessor`]: Loads, converts, writes and checkpoints one partition
//! - [`CheckpointManager`]: Persists per-partition progress for restarts
//! - [`Scheduler`]: Runs partitions on a bounded pool of threads
//! - [`MassIndexingJob`]: Purge, plan, index and optimize in order
//! - [`ProgressMonitor`]: Receives progress events
//!
//! ## Architecture
//!
//! 1. The scope is resolved and validated before anything is written
//! 2. Every in-scope type is purged from the index, then optionally optimized
//! 3. Keys are enumerated once to persist a partition plan
//! 4. Partitions are processed in chunks of `checkpoint_interval` keys; each
//!    chunk is flushed before its checkpoint is written
//! 5. A restart with the same job name skips completed partitions and
//!    resumes the others after their last committed key
//!
//! ## Example
//!
//! ```ignore
//! use massindex_core::{MassIndexingJob, StoreRegistry, StorageSource, StorageCheckpointStore};
//!
//! let job = MassIndexingJob::new(
//!     JobParameters::for_types(["Book", "Author"]),
//!     Arc::new(StoreRegistry::single("main", Arc::new(StorageSource::new(storage.clone())))),
//!     Arc::new(SearchIndexSink::new(SearchIndexer::new(&index)?)),
//!     Arc::new(StorageCheckpointStore::new(storage)),
//! );
//! let report = job.run()?;
//! ```

pub mod checkpoint;
pub mod chunk;
pub mod controller;
pub mod converter;
pub mod enumerator;
pub mod planner;
pub mod progress;
pub mod scheduler;
pub mod scope;
pub mod sink;
pub mod source;
pub mod store_adapter;

#[cfg(test)]
mod test_support;

pub use checkpoint::{CheckpointManager, CheckpointStore, MemoryCheckpointStore, ResumePoint};
pub use chunk::{ChunkProcessor, ChunkSettings, PartitionOutcome, PartitionRunner, SkipPolicy};
pub use controller::{JobReport, MassIndexingJob, PartitionReport, TypeReport};
pub use converter::{ConverterRegistry, DocumentConverter, JsonFieldConverter};
pub use enumerator::KeyEnumerator;
pub use planner::PartitionPlanner;
pub use progress::{
    LoggingProgressMonitor, NoOpProgressMonitor, OptimizePhase, ProgressEvent, ProgressMonitor,
};
pub use scheduler::{ExecutionBudget, Scheduler, StopSignal, TypeWork};
pub use scope::{IndexingScope, ScopeBuilder, ScopeEntry, ScopeResolver};
pub use sink::{FlushGate, IndexSink, SearchIndexSink};
pub use source::{LoadContext, LoadSession, RecordSource, StoreRegistry, StoreResolver};
pub use store_adapter::{StorageCheckpointStore, StorageSource, TENANT_FIELD};
