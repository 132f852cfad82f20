//! Checkpoint records for partition progress.
//!
//! A checkpoint is a durable marker of the last chunk fully committed for a
//! partition. Restarted runs resume at `last_committed_chunk + 1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::PrimaryKey;
use crate::partition::{PartitionId, PartitionStatus};

/// Record counters accumulated by chunk processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressCounts {
    /// Keys for which a load was attempted
    pub read: u64,
    /// Documents submitted to the index
    pub indexed: u64,
    /// Records dropped by load or conversion failures
    pub skipped: u64,
    /// Records the converter declined to index
    pub filtered: u64,
}

impl ProgressCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records handled (indexed + skipped + filtered).
    pub fn processed(&self) -> u64 {
        self.indexed + self.skipped + self.filtered
    }

    pub fn record_indexed(&mut self) {
        self.read += 1;
        self.indexed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.read += 1;
        self.skipped += 1;
    }

    pub fn record_filtered(&mut self) {
        self.read += 1;
        self.filtered += 1;
    }

    /// Merge another set of counters into this one.
    pub fn merge(&mut self, other: &ProgressCounts) {
        self.read += other.read;
        self.indexed += other.indexed;
        self.skipped += other.skipped;
        self.filtered += other.filtered;
    }
}

/// Persisted progress of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub partition_id: PartitionId,

    /// Index of the last fully committed chunk; 0 when none
    pub last_committed_chunk: u32,

    /// Last key of the last committed chunk
    pub last_committed_key: Option<PrimaryKey>,

    /// Cumulative counters over all committed chunks
    pub counts: ProgressCounts,

    pub status: PartitionStatus,

    /// Last modification time (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Fresh record for a planned partition.
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            last_committed_chunk: 0,
            last_committed_key: None,
            counts: ProgressCounts::new(),
            status: PartitionStatus::Planned,
            updated_at: Utc::now(),
        }
    }

    /// First chunk to run when (re)starting this partition.
    pub fn next_chunk(&self) -> u32 {
        self.last_committed_chunk + 1
    }

    /// Advance past a committed chunk.
    pub fn advance(&mut self, chunk: u32, last_key: PrimaryKey, chunk_counts: &ProgressCounts) {
        self.last_committed_chunk = chunk;
        self.last_committed_key = Some(last_key);
        self.counts.merge(chunk_counts);
        self.status = PartitionStatus::Checkpointed;
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: PartitionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    fn partition_id() -> PartitionId {
        PartitionId::new(EntityType::new("Book").unwrap(), 2)
    }

    #[test]
    fn test_counts_accumulate() {
        let mut counts = ProgressCounts::new();
        counts.record_indexed();
        counts.record_indexed();
        counts.record_skipped();
        counts.record_filtered();
        assert_eq!(counts.read, 4);
        assert_eq!(counts.processed(), 4);

        let mut total = ProgressCounts::new();
        total.merge(&counts);
        total.merge(&counts);
        assert_eq!(total.indexed, 4);
        assert_eq!(total.skipped, 2);
    }

    #[test]
    fn test_checkpoint_new_starts_at_chunk_one() {
        let record = CheckpointRecord::new(partition_id());
        assert_eq!(record.last_committed_chunk, 0);
        assert_eq!(record.next_chunk(), 1);
        assert_eq!(record.status, PartitionStatus::Planned);
    }

    #[test]
    fn test_checkpoint_advance() {
        let mut record = CheckpointRecord::new(partition_id());
        let mut chunk = ProgressCounts::new();
        chunk.record_indexed();

        record.advance(4, 8_000, &chunk);
        assert_eq!(record.next_chunk(), 5);
        assert_eq!(record.last_committed_key, Some(8_000));
        assert_eq!(record.counts.indexed, 1);
        assert_eq!(record.status, PartitionStatus::Checkpointed);
    }

    #[test]
    fn test_checkpoint_json_format() {
        let record = CheckpointRecord::new(partition_id());
        let json_str = String::from_utf8(record.to_bytes().unwrap()).unwrap();

        assert!(json_str.contains("\"last_committed_chunk\":0"));
        assert!(json_str.contains("\"status\":\"PLANNED\""));
        assert!(json_str.contains("\"entity_type\":\"Book\""));

        let decoded = CheckpointRecord::from_bytes(json_str.as_bytes()).unwrap();
        assert_eq!(decoded.partition_id, record.partition_id);
        assert_eq!(
            decoded.updated_at.timestamp_millis(),
            record.updated_at.timestamp_millis()
        );
    }
}
