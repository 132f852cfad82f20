//! Partitions, chunks and partition plans.
//!
//! A partition is an independently schedulable, disjoint slice of one entity
//! type's key space. Partitions are numbered from 1 within their type and are
//! processed chunk by chunk, chunks also numbered from 1.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityType, PrimaryKey};

/// Identifier of a partition: owning type plus 1-based index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub entity_type: EntityType,
    pub index: u32,
}

impl PartitionId {
    pub fn new(entity_type: EntityType, index: u32) -> Self {
        Self { entity_type, index }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.index)
    }
}

/// Lifecycle of a partition.
///
/// `Planned → Running → {Checkpointed → Running}* → Completed`, with
/// `Failed` on unrecoverable errors and `Abandoned` on external stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionStatus {
    Planned,
    Running,
    Checkpointed,
    Completed,
    Failed,
    Abandoned,
}

impl PartitionStatus {
    /// Terminal for the current execution (a restart may revive all but `Completed`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PartitionStatus::Completed | PartitionStatus::Failed | PartitionStatus::Abandoned
        )
    }

    pub fn can_transition_to(&self, next: PartitionStatus) -> bool {
        use PartitionStatus::*;
        match (*self, next) {
            (Completed, _) => false,
            (_, Planned) => false,
            (Planned, Running) => true,
            (Planned, _) => false,
            // Restart of an interrupted, failed or abandoned partition
            (Running | Checkpointed | Failed | Abandoned, Running) => true,
            (Running | Checkpointed, Checkpointed | Completed | Failed | Abandoned) => true,
            (Failed | Abandoned, _) => false,
        }
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionStatus::Planned => "PLANNED",
            PartitionStatus::Running => "RUNNING",
            PartitionStatus::Checkpointed => "CHECKPOINTED",
            PartitionStatus::Completed => "COMPLETED",
            PartitionStatus::Failed => "FAILED",
            PartitionStatus::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Inclusive key bounds; `None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Option<PrimaryKey>,
    pub end: Option<PrimaryKey>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: PrimaryKey, end: PrimaryKey) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, key: PrimaryKey) -> bool {
        self.start.is_none_or(|s| key >= s) && self.end.is_none_or(|e| key <= e)
    }
}

/// A planned slice of one entity type's key sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub first_key: PrimaryKey,
    pub last_key: PrimaryKey,
    /// Keys enumerated for this slice at planning time
    pub key_count: u64,
    /// False when the type's restriction forbids slicing
    pub parallel: bool,
}

impl Partition {
    pub fn entity_type(&self) -> &EntityType {
        &self.id.entity_type
    }

    pub fn key_range(&self) -> KeyRange {
        KeyRange::between(self.first_key, self.last_key)
    }

    /// Number of chunks the partition splits into at the given interval.
    pub fn chunk_count(&self, checkpoint_interval: usize) -> u64 {
        let interval = checkpoint_interval.max(1) as u64;
        self.key_count.div_ceil(interval)
    }
}

/// A bounded run of keys processed and committed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub partition: PartitionId,
    /// 1-based, unique within the partition
    pub sequence: u32,
    pub keys: Vec<PrimaryKey>,
}

impl Chunk {
    pub fn last_key(&self) -> Option<PrimaryKey> {
        self.keys.last().copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// All partitions of a job, ordered by type then index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub partitions: Vec<Partition>,
}

impl PartitionPlan {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn for_type<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> impl Iterator<Item = &'a Partition> {
        self.partitions
            .iter()
            .filter(move |p| p.entity_type() == entity_type)
    }

    pub fn get(&self, id: &PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| &p.id == id)
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
