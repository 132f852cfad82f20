//! Index writer seam.
//!
//! [`IndexSink`] is the engine's view of the index writer. Documents can be
//! submitted concurrently; flushes are serialized job-wide by the
//! [`FlushGate`], which also owns the retry policy.

use std::sync::Mutex;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{debug, error, warn};

use massindex_search::SearchIndexer;
use massindex_types::{EntityType, IndexDocument, MassIndexError};

/// Write access to the full-text index.
pub trait IndexSink: Send + Sync {
    /// Buffer documents, replacing existing documents with the same id.
    fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize, MassIndexError>;

    /// Make buffered documents durable.
    fn flush(&self) -> Result<(), MassIndexError>;

    /// Remove every document of a type, optionally of one tenant only.
    fn purge(&self, entity_type: &EntityType, tenant_id: Option<&str>)
        -> Result<(), MassIndexError>;

    fn optimize(&self) -> Result<(), MassIndexError>;
}

/// Global flush lock with bounded exponential-backoff retries.
pub struct FlushGate {
    lock: Mutex<()>,
    retries: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl FlushGate {
    /// `retries` is the number of attempts after the first failure.
    pub fn new(retries: u32) -> Self {
        Self {
            lock: Mutex::new(()),
            retries,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max.max(initial);
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Flush `sink` while holding the gate.
    ///
    /// Returns [`MassIndexError::Flush`] once the retry budget is spent.
    pub fn flush(&self, sink: &dyn IndexSink) -> Result<(), MassIndexError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempts = 0;

        loop {
            attempts += 1;
            match sink.flush() {
                Ok(()) => {
                    if attempts > 1 {
                        debug!(attempts, "Flush succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts > self.retries {
                        error!(error = %e, attempts, "Flush retries exhausted");
                        return Err(MassIndexError::Flush(format!(
                            "gave up after {} attempts: {}",
                            attempts, e
                        )));
                    }
                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis() as u64,
                                "Flush failed, retrying"
                            );
                            std::thread::sleep(duration);
                        }
                        None => {
                            return Err(MassIndexError::Flush(format!(
                                "backoff exhausted: {}",
                                e
                            )))
                        }
                    }
                }
            }
        }
    }
}

impl Default for FlushGate {
    fn default() -> Self {
        Self::new(3)
    }
}

/// [`IndexSink`] backed by the Tantivy indexer.
pub struct SearchIndexSink {
    indexer: SearchIndexer,
}

impl SearchIndexSink {
    pub fn new(indexer: SearchIndexer) -> Self {
        Self { indexer }
    }

    pub fn indexer(&self) -> &SearchIndexer {
        &self.indexer
    }
}

impl IndexSink for SearchIndexSink {
    fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize, MassIndexError> {
        self.indexer
            .add_documents(documents)
            .map_err(|e| MassIndexError::Flush(e.to_string()))
    }

    fn flush(&self) -> Result<(), MassIndexError> {
        self.indexer
            .commit()
            .map(|_| ())
            .map_err(|e| MassIndexError::Flush(e.to_string()))
    }

    fn purge(
        &self,
        entity_type: &EntityType,
        tenant_id: Option<&str>,
    ) -> Result<(), MassIndexError> {
        Ok(self.indexer.purge(entity_type, tenant_id)?)
    }

    fn optimize(&self) -> Result<(), MassIndexError> {
        let merged = self.indexer.optimize()?;
        debug!(segments = merged, "Merged index segments");
        Ok(())
    }
}
