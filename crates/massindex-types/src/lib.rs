//! # massindex-types
//!
//! Shared domain types for the mass-indexing system.
//!
//! This crate defines the data structures passed between the storage,
//! search and engine crates:
//! - Entities: entity type identifiers, primary keys, records and index documents
//! - Restrictions: declarative predicates and opaque queries narrowing a scope
//! - Partitions: planned key slices, chunks and the partition plan
//! - Checkpoints: per-partition progress records
//! - Jobs: job execution state
//! - Settings: job parameters and CLI configuration
//!
//! ## Usage
//!
//! ```rust
//! use massindex_types::{EntityType, JobParameters};
//!
//! let params = JobParameters::for_types(["Book", "Author"]);
//! assert_eq!(params.entity_types.len(), 2);
//! assert_eq!(params.checkpoint_interval(), 2000);
//! let book = EntityType::new("Book").unwrap();
//! assert_eq!(book.as_str(), "Book");
//! ```

pub mod checkpoint;
pub mod config;
pub mod entity;
pub mod error;
pub mod job;
pub mod partition;
pub mod restriction;

pub use checkpoint::{CheckpointRecord, ProgressCounts};
pub use config::{CacheMode, FetchSize, HandleNamespace, JobParameters, Settings};
pub use entity::{EntityType, IndexDocument, PrimaryKey, Record};
pub use error::MassIndexError;
pub use job::{JobExecution, JobStatus};
pub use partition::{Chunk, KeyRange, Partition, PartitionId, PartitionPlan, PartitionStatus};
pub use restriction::{Predicate, Restriction};
