//! Key encoding and decoding for the storage layer.
//!
//! Primary keys are zero-padded to 20 digits so that RocksDB's lexicographic
//! byte order equals ascending key order within one entity type.
//!
//! - records: `rec:{entity_type}:{key:020}`
//! - checkpoints: `ckpt:{job_name}:{entity_type}:{index:010}`
//! - partition plans: `plan:{job_name}`
//! - job executions: `job:{job_name}`

use massindex_types::{EntityType, PartitionId, PrimaryKey};

use crate::error::StorageError;

/// Key for record storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub entity_type: EntityType,
    pub key: PrimaryKey,
}

impl RecordKey {
    pub fn new(entity_type: EntityType, key: PrimaryKey) -> Self {
        Self { entity_type, key }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("rec:{}:{:020}", self.entity_type, self.key).into_bytes()
    }

    /// Prefix shared by every record of a type
    pub fn type_prefix(entity_type: &EntityType) -> Vec<u8> {
        format!("rec:{}:", entity_type).into_bytes()
    }

    /// Scan start for keys >= `key`
    pub fn seek(entity_type: &EntityType, key: PrimaryKey) -> Vec<u8> {
        format!("rec:{}:{:020}", entity_type, key).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "rec" {
            return Err(StorageError::Key(format!("Invalid record key format: {}", s)));
        }
        let entity_type = EntityType::new(parts[1])
            .map_err(|e| StorageError::Key(format!("Invalid entity type: {}", e)))?;
        let key: PrimaryKey = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid primary key: {}", e)))?;

        Ok(Self { entity_type, key })
    }
}

/// Key for partition checkpoint entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub job_name: String,
    pub partition_id: PartitionId,
}

impl CheckpointKey {
    pub fn new(job_name: impl Into<String>, partition_id: PartitionId) -> Self {
        Self {
            job_name: job_name.into(),
            partition_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "ckpt:{}:{}:{:010}",
            self.job_name, self.partition_id.entity_type, self.partition_id.index
        )
        .into_bytes()
    }

    /// Prefix shared by every checkpoint of a job
    pub fn job_prefix(job_name: &str) -> Vec<u8> {
        format!("ckpt:{}:", job_name).into_bytes()
    }
}

/// Key for persisted partition plans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanKey {
    pub job_name: String,
}

impl PlanKey {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("plan:{}", self.job_name).into_bytes()
    }
}

/// Key for job executions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    pub job_name: String,
}

impl JobKey {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("job:{}", self.job_name).into_bytes()
    }
}
