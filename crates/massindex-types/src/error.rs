//! Error types for the mass-indexing system.

use thiserror::Error;

/// Unified error type for mass-indexing operations.
///
/// Variants fall into three propagation classes, see
/// [`MassIndexError::is_per_record`], [`MassIndexError::is_partition_fatal`]
/// and [`MassIndexError::is_job_fatal`].
#[derive(Debug, Error)]
pub enum MassIndexError {
    /// Invalid or empty type set, or a restriction given both ways
    #[error("Scope configuration error: {0}")]
    ScopeConfiguration(String),

    /// Malformed restriction, detected when keys are first enumerated
    #[error("Scope query error: {0}")]
    ScopeQuery(String),

    /// A single record could not be loaded
    #[error("Record load error: {0}")]
    RecordLoad(String),

    /// A single record could not be converted to a document
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The backing store cannot serve requests at all
    #[error("Record source unavailable: {0}")]
    SourceUnavailable(String),

    /// Too many records of one chunk were skipped
    #[error("Skip rate exceeded: {0}")]
    SkipRateExceeded(String),

    /// Index writer unreachable or locked beyond the retry budget
    #[error("Flush error: {0}")]
    Flush(String),

    /// Checkpoint state could not be persisted
    #[error("Checkpoint persist error: {0}")]
    CheckpointPersist(String),

    /// No record store registered under the requested reference
    #[error("Handle not found: {0}")]
    HandleNotFound(String),

    /// Invalid job parameter or settings value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage layer failure outside the checkpoint path
    #[error("Storage error: {0}")]
    Storage(String),

    /// Search index failure outside the flush path
    #[error("Search error: {0}")]
    Search(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MassIndexError {
    /// Errors absorbed into skip counters.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            MassIndexError::RecordLoad(_) | MassIndexError::Conversion(_)
        )
    }

    /// Errors that abort the owning partition but spare its siblings.
    pub fn is_partition_fatal(&self) -> bool {
        matches!(
            self,
            MassIndexError::SourceUnavailable(_)
                | MassIndexError::SkipRateExceeded(_)
                | MassIndexError::Flush(_)
                | MassIndexError::ScopeQuery(_)
                | MassIndexError::Storage(_)
                | MassIndexError::Search(_)
                | MassIndexError::Serialization(_)
        )
    }

    /// Errors that halt the whole run.
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            MassIndexError::ScopeConfiguration(_)
                | MassIndexError::CheckpointPersist(_)
                | MassIndexError::HandleNotFound(_)
                | MassIndexError::Config(_)
        )
    }
}
