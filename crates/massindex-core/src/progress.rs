//! Progress reporting.
//!
//! Monitors observe job and partition lifecycle events. They never feed
//! back into control flow.

use tracing::{debug, info, warn};

use massindex_types::{EntityType, JobStatus, PartitionId, PartitionStatus, ProgressCounts};

/// Which optimize step ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizePhase {
    AfterPurge,
    OnFinish,
}

/// Lifecycle and counter events emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    JobStarted {
        job_name: String,
        execution_id: String,
        restart_count: u32,
    },
    Purged {
        entity_types: Vec<EntityType>,
    },
    Optimized {
        phase: OptimizePhase,
    },
    PlanReady {
        partitions: usize,
        pending: usize,
    },
    PartitionStarted {
        partition: PartitionId,
        resume_chunk: u32,
    },
    /// Counters of the committed chunk only
    ChunkCommitted {
        partition: PartitionId,
        chunk: u32,
        counts: ProgressCounts,
    },
    /// Cumulative counters of the partition
    PartitionFinished {
        partition: PartitionId,
        status: PartitionStatus,
        counts: ProgressCounts,
    },
    JobFinished {
        status: JobStatus,
        counts: ProgressCounts,
    },
}

/// Receives progress events from every worker thread.
pub trait ProgressMonitor: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// A monitor that ignores all events.
pub struct NoOpProgressMonitor;

impl ProgressMonitor for NoOpProgressMonitor {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// A monitor that logs events through `tracing`.
///
/// Chunk commits are logged at info level every `chunk_log_interval`
/// chunks and at debug level otherwise.
pub struct LoggingProgressMonitor {
    chunk_log_interval: u32,
}

impl LoggingProgressMonitor {
    pub fn new(chunk_log_interval: u32) -> Self {
        Self {
            chunk_log_interval: chunk_log_interval.max(1),
        }
    }
}

impl Default for LoggingProgressMonitor {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ProgressMonitor for LoggingProgressMonitor {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::JobStarted {
                job_name,
                execution_id,
                restart_count,
            } => info!(
                job = %job_name,
                execution_id = %execution_id,
                restarts = restart_count,
                "Mass indexing job started"
            ),
            ProgressEvent::Purged { entity_types } => {
                info!(types = entity_types.len(), "Purged index")
            }
            ProgressEvent::Optimized { phase } => info!(phase = ?phase, "Optimized index"),
            ProgressEvent::PlanReady {
                partitions,
                pending,
            } => info!(partitions, pending, "Partition plan ready"),
            ProgressEvent::PartitionStarted {
                partition,
                resume_chunk,
            } => debug!(partition = %partition, chunk = resume_chunk, "Partition started"),
            ProgressEvent::ChunkCommitted {
                partition,
                chunk,
                counts,
            } => {
                if chunk % self.chunk_log_interval == 0 {
                    info!(
                        partition = %partition,
                        chunk,
                        indexed = counts.indexed,
                        skipped = counts.skipped,
                        "Chunk committed"
                    );
                } else {
                    debug!(partition = %partition, chunk, "Chunk committed");
                }
            }
            ProgressEvent::PartitionFinished {
                partition,
                status,
                counts,
            } => match status {
                PartitionStatus::Failed => warn!(
                    partition = %partition,
                    read = counts.read,
                    indexed = counts.indexed,
                    "Partition failed"
                ),
                _ => info!(
                    partition = %partition,
                    status = %status,
                    read = counts.read,
                    indexed = counts.indexed,
                    skipped = counts.skipped,
                    filtered = counts.filtered,
                    "Partition finished"
                ),
            },
            ProgressEvent::JobFinished { status, counts } => info!(
                status = %status,
                read = counts.read,
                indexed = counts.indexed,
                skipped = counts.skipped,
                filtered = counts.filtered,
                "Mass indexing job finished"
            ),
        }
    }
}
