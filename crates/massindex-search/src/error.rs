//! Search error types.

use massindex_types::MassIndexError;
use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Writer lock poisoned by a panicking holder
    #[error("Index is locked: {0}")]
    IndexLocked(String),
}

impl From<SearchError> for MassIndexError {
    fn from(err: SearchError) -> Self {
        MassIndexError::Search(err.to_string())
    }
}
