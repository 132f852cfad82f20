//! # massindex-search
//!
//! Full-text index for mass indexing, backed by Tantivy.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence
//! - One schema for every entity type, filtered by an `entity_type` term
//! - Replace-by-id document writes, purge by type and tenant
//! - Optimize by merging all searchable segments

pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;

pub use document::to_tantivy_doc;
pub use error::SearchError;
pub use index::{open_or_create_index, SearchIndex, SearchIndexConfig};
pub use indexer::SearchIndexer;
pub use schema::{build_index_schema, IndexSchema};
pub use searcher::{IndexSearcher, SearchHit};
