//! Checkpointed chunk processing of one partition.
//!
//! Per chunk the processor takes up to `checkpoint_interval` keys, loads
//! the records in batches, converts and submits them, flushes through the
//! [`FlushGate`] and only then commits the checkpoint. Chunks of a
//! partition run strictly in sequence.

use tracing::{debug, warn};

use massindex_types::{
    CheckpointRecord, Chunk, FetchSize, JobParameters, MassIndexError, Partition, PartitionId,
    PartitionStatus, ProgressCounts,
};

use crate::checkpoint::CheckpointManager;
use crate::converter::ConverterRegistry;
use crate::enumerator::KeyEnumerator;
use crate::progress::{ProgressEvent, ProgressMonitor};
use crate::scheduler::StopSignal;
use crate::scope::IndexingScope;
use crate::sink::{FlushGate, IndexSink};
use crate::source::{LoadContext, LoadSession, RecordSource};

/// Threshold above which skipped records indicate a systemic failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipPolicy {
    /// Fraction of a chunk's records that may be skipped
    pub max_skip_ratio: f64,
    /// Chunks smaller than this never trip the policy
    pub min_records: u64,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            max_skip_ratio: 0.5,
            min_records: 20,
        }
    }
}

impl SkipPolicy {
    /// Never fail a chunk because of skips.
    pub fn tolerant() -> Self {
        Self {
            max_skip_ratio: 1.0,
            min_records: u64::MAX,
        }
    }

    pub fn is_exceeded(&self, counts: &ProgressCounts) -> bool {
        counts.read >= self.min_records
            && counts.read > 0
            && counts.skipped as f64 / counts.read as f64 > self.max_skip_ratio
    }
}

/// Chunk sizing derived from resolved job parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSettings {
    pub checkpoint_interval: usize,
    pub session_clear_interval: usize,
    pub entity_fetch_size: usize,
    pub fetch_size: FetchSize,
    pub skip_policy: SkipPolicy,
}

impl ChunkSettings {
    pub fn from_params(params: &JobParameters) -> Self {
        Self {
            checkpoint_interval: params.checkpoint_interval().max(1),
            session_clear_interval: params.session_clear_interval().max(1),
            entity_fetch_size: params.entity_fetch_size().max(1),
            fetch_size: params.fetch_size(),
            skip_policy: SkipPolicy::default(),
        }
    }

    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }
}

/// Result of running one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionOutcome {
    pub partition: PartitionId,
    /// `Completed`, `Failed` or `Abandoned`
    pub status: PartitionStatus,
    /// Cumulative over every committed chunk, including earlier runs
    pub counts: ProgressCounts,
    pub last_committed_chunk: u32,
    /// Chunks committed by this run
    pub chunks_committed: u32,
    pub error: Option<String>,
}

/// Runs one partition at a time; shared by every loader thread.
pub trait PartitionRunner: Sync {
    /// Returns `Err` only for job-fatal errors; partition failures are
    /// reported through the outcome.
    fn run(&self, partition: &Partition) -> Result<PartitionOutcome, MassIndexError>;
}

/// Drives partitions chunk by chunk.
pub struct ChunkProcessor<'a> {
    pub source: &'a dyn RecordSource,
    pub scope: &'a IndexingScope,
    pub converters: &'a ConverterRegistry,
    pub sink: &'a dyn IndexSink,
    pub flush_gate: &'a FlushGate,
    pub checkpoints: &'a CheckpointManager,
    pub monitor: &'a dyn ProgressMonitor,
    pub stop: &'a StopSignal,
    pub ctx: &'a LoadContext,
    pub settings: ChunkSettings,
}

impl ChunkProcessor<'_> {
    fn finish(
        &self,
        record: &mut CheckpointRecord,
        status: PartitionStatus,
        chunks_committed: u32,
        error: Option<MassIndexError>,
    ) -> Result<PartitionOutcome, MassIndexError> {
        match status {
            PartitionStatus::Completed => self.checkpoints.complete(record)?,
            PartitionStatus::Abandoned => self.checkpoints.abandon(record)?,
            _ => self.checkpoints.fail(record)?,
        }
        if let Some(e) = &error {
            warn!(
                partition = %record.partition_id,
                chunk = record.next_chunk(),
                error = %e,
                "Partition aborted"
            );
        }
        self.monitor.on_event(&ProgressEvent::PartitionFinished {
            partition: record.partition_id.clone(),
            status: record.status,
            counts: record.counts,
        });
        Ok(PartitionOutcome {
            partition: record.partition_id.clone(),
            status: record.status,
            counts: record.counts,
            last_committed_chunk: record.last_committed_chunk,
            chunks_committed,
            error: error.map(|e| e.to_string()),
        })
    }

    /// Fail the partition on partition-scoped errors; anything else is
    /// job-fatal and propagates to the scheduler.
    fn abort(
        &self,
        record: &mut CheckpointRecord,
        chunks_committed: u32,
        error: MassIndexError,
    ) -> Result<PartitionOutcome, MassIndexError> {
        if error.is_partition_fatal() || error.is_per_record() {
            return self.finish(record, PartitionStatus::Failed, chunks_committed, Some(error));
        }
        Err(error)
    }

    /// Load, convert and submit one chunk, then flush.
    ///
    /// Errors abort the partition; job-fatal classes are passed through.
    fn process_chunk(
        &self,
        session: &mut dyn LoadSession,
        chunk: &Chunk,
    ) -> Result<ProgressCounts, MassIndexError> {
        let entity_type = &chunk.partition.entity_type;
        let converter = self.converters.for_type(entity_type);
        let tenant = self.ctx.tenant();
        let mut counts = ProgressCounts::new();
        let mut since_clear = 0usize;

        for batch in chunk.keys.chunks(self.settings.entity_fetch_size) {
            let loaded = session.load(entity_type, batch)?;
            if loaded.len() != batch.len() {
                return Err(MassIndexError::SourceUnavailable(format!(
                    "requested {} records of {}, received {}",
                    batch.len(),
                    entity_type,
                    loaded.len()
                )));
            }

            let mut documents = Vec::with_capacity(batch.len());
            for (key, result) in batch.iter().zip(loaded) {
                match result.and_then(|record| converter.convert(&record, tenant)) {
                    Ok(Some(document)) => {
                        documents.push(document);
                        counts.record_indexed();
                    }
                    Ok(None) => counts.record_filtered(),
                    Err(e) if e.is_per_record() => {
                        debug!(entity_type = %entity_type, key, error = %e, "Skipped record");
                        counts.record_skipped();
                    }
                    Err(e) => return Err(e),
                }

                since_clear += 1;
                if since_clear >= self.settings.session_clear_interval {
                    session.clear();
                    since_clear = 0;
                }
            }

            if !documents.is_empty() {
                self.sink.add_documents(&documents)?;
            }
        }

        if self.settings.skip_policy.is_exceeded(&counts) {
            return Err(MassIndexError::SkipRateExceeded(format!(
                "{} of {} records skipped in chunk {} of {}, limit is {:.0}%",
                counts.skipped,
                counts.read,
                chunk.sequence,
                chunk.partition,
                self.settings.skip_policy.max_skip_ratio * 100.0
            )));
        }

        self.flush_gate.flush(self.sink)?;
        session.clear();
        Ok(counts)
    }
}

impl PartitionRunner for ChunkProcessor<'_> {
    fn run(&self, partition: &Partition) -> Result<PartitionOutcome, MassIndexError> {
        let mut record = self.checkpoints.begin(&partition.id)?;
        self.monitor.on_event(&ProgressEvent::PartitionStarted {
            partition: partition.id.clone(),
            resume_chunk: record.next_chunk(),
        });

        let entity_type = partition.entity_type();
        let mut keys = KeyEnumerator::new(self.source, entity_type, self.ctx)
            .with_restriction(self.scope.restriction(entity_type))
            .with_range(partition.key_range())
            .with_fetch_size(self.settings.fetch_size)
            .starting_after(record.last_committed_key);

        let mut session = match self.source.open_session(self.ctx) {
            Ok(session) => session,
            Err(e) => return self.abort(&mut record, 0, e),
        };

        let mut chunks_committed = 0;
        loop {
            let chunk_keys = match keys.next_chunk(self.settings.checkpoint_interval) {
                Ok(chunk_keys) => chunk_keys,
                Err(e) => return self.abort(&mut record, chunks_committed, e),
            };
            let Some(last_key) = chunk_keys.last().copied() else {
                break;
            };
            if self.stop.is_stopped() {
                debug!(partition = %partition.id, "Stop requested, abandoning partition");
                return self.finish(&mut record, PartitionStatus::Abandoned, chunks_committed, None);
            }

            let chunk = Chunk {
                partition: partition.id.clone(),
                sequence: record.next_chunk(),
                keys: chunk_keys,
            };
            let counts = match self.process_chunk(session.as_mut(), &chunk) {
                Ok(counts) => counts,
                Err(e) => return self.abort(&mut record, chunks_committed, e),
            };

            self.checkpoints
                .commit_chunk(&mut record, chunk.sequence, last_key, &counts)?;
            chunks_committed += 1;
            self.monitor.on_event(&ProgressEvent::ChunkCommitted {
                partition: partition.id.clone(),
                chunk: chunk.sequence,
                counts,
            });
        }

        self.finish(&mut record, PartitionStatus::Completed, chunks_committed, None)
    }
}
