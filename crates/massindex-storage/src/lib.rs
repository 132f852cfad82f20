//! Storage layer for the mass-indexing system.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for records and job runtime state
//! - Zero-padded keys so byte order equals primary key order
//! - Atomic checkpoint and plan writes via WriteBatch
//! - A small opaque query language evaluated during key scans
//! - A shared LRU record cache honouring the job's cache mode

pub mod cache;
pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod query;

pub use cache::RecordCache;
pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, JobKey, PlanKey, RecordKey};
pub use query::Query;
