//! RocksDB wrapper for mass-indexing storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Record writes, batched loads and ordered key scans
//! - Checkpoint, partition plan and job execution persistence
//! - Atomic multi-entry writes via WriteBatch

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info, warn};

use massindex_types::{
    CacheMode, CheckpointRecord, EntityType, JobExecution, KeyRange, PartitionId, PartitionPlan,
    PrimaryKey, Record,
};

use crate::cache::{CacheStats, RecordCache, DEFAULT_CACHE_CAPACITY};
use crate::column_families::{
    build_cf_descriptors, CF_CHECKPOINTS, CF_JOBS, CF_PARTITIONS, CF_RECORDS,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, JobKey, PlanKey, RecordKey};

/// Main storage interface
pub struct Storage {
    db: DB,
    cache: RecordCache,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_with_cache(path, DEFAULT_CACHE_CAPACITY)
    }

    /// Open storage with an explicit record cache capacity
    pub fn open_with_cache(path: &Path, cache_capacity: usize) -> Result<Self, StorageError> {
        info!(path = ?path, cache_capacity, "Opening storage");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        Ok(Self {
            db,
            cache: RecordCache::new(cache_capacity),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Record Methods ====================

    /// Store a single record, replacing any previous version.
    pub fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let key = RecordKey::new(record.entity_type.clone(), record.key);
        self.db.put_cf(cf, key.to_bytes(), record.to_bytes()?)?;
        self.cache.invalidate(&record.entity_type, record.key);
        Ok(())
    }

    /// Store many records in one atomic write. Returns the count written.
    pub fn put_records(&self, records: &[Record]) -> Result<usize, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let mut batch = WriteBatch::default();
        for record in records {
            let key = RecordKey::new(record.entity_type.clone(), record.key);
            batch.put_cf(cf, key.to_bytes(), record.to_bytes()?);
        }
        self.db.write(batch)?;
        for record in records {
            self.cache.invalidate(&record.entity_type, record.key);
        }
        debug!(count = records.len(), "Stored records");
        Ok(records.len())
    }

    pub fn get_record(
        &self,
        entity_type: &EntityType,
        key: PrimaryKey,
    ) -> Result<Option<Record>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let record_key = RecordKey::new(entity_type.clone(), key);
        match self.db.get_cf(cf, record_key.to_bytes())? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_record(&self, entity_type: &EntityType, key: PrimaryKey) -> Result<(), StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        self.db
            .delete_cf(cf, RecordKey::new(entity_type.clone(), key).to_bytes())?;
        self.cache.invalidate(entity_type, key);
        Ok(())
    }

    /// Store raw bytes under a record key without encoding them.
    pub fn put_raw_record(
        &self,
        entity_type: &EntityType,
        key: PrimaryKey,
        value: &[u8],
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        self.db
            .put_cf(cf, RecordKey::new(entity_type.clone(), key).to_bytes(), value)?;
        self.cache.invalidate(entity_type, key);
        Ok(())
    }

    /// Load a batch of records by key, consulting the shared cache per `mode`.
    ///
    /// The result is positionally aligned with `keys`; `Ok(None)` marks a
    /// key with no stored record and `Err` a value that does not decode.
    /// The outer error is reserved for failures of the whole batch.
    pub fn load_records(
        &self,
        entity_type: &EntityType,
        keys: &[PrimaryKey],
        mode: CacheMode,
    ) -> Result<Vec<Result<Option<Record>, StorageError>>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let mut results: Vec<Result<Option<Record>, StorageError>> = keys
            .iter()
            .map(|key| Ok(self.cache.get(mode, entity_type, *key)))
            .collect();

        let missing: Vec<usize> = (0..keys.len())
            .filter(|i| matches!(results[*i], Ok(None)))
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let fetched = self.db.multi_get_cf(missing.iter().map(|i| {
            (
                cf,
                RecordKey::new(entity_type.clone(), keys[*i]).to_bytes(),
            )
        }));

        for (slot, value) in missing.into_iter().zip(fetched) {
            let Some(bytes) = value? else {
                continue;
            };
            match Record::from_bytes(&bytes) {
                Ok(record) => {
                    self.cache.put(mode, &record);
                    results[slot] = Ok(Some(record));
                }
                Err(e) => {
                    warn!(entity_type = %entity_type, key = keys[slot], error = %e, "Undecodable record");
                    results[slot] = Err(e.into());
                }
            }
        }

        Ok(results)
    }

    /// Ascending keys of `entity_type` inside `range` accepted by `filter`.
    ///
    /// Values are not decoded. Stops after `limit` accepted keys.
    pub fn scan_keys<F>(
        &self,
        entity_type: &EntityType,
        range: KeyRange,
        limit: Option<usize>,
        mut filter: F,
    ) -> Result<Vec<PrimaryKey>, StorageError>
    where
        F: FnMut(PrimaryKey) -> bool,
    {
        let mut keys = Vec::new();
        self.scan(entity_type, range, limit, |key, _| Ok(filter(key)), &mut keys)?;
        Ok(keys)
    }

    /// Ascending keys of `entity_type` inside `range` whose decoded record
    /// is accepted by `filter`. Stops after `limit` accepted keys.
    ///
    /// Values that do not decode are left out and counted in a warning.
    pub fn scan_records<F>(
        &self,
        entity_type: &EntityType,
        range: KeyRange,
        limit: Option<usize>,
        mut filter: F,
    ) -> Result<Vec<PrimaryKey>, StorageError>
    where
        F: FnMut(&Record) -> bool,
    {
        let mut keys = Vec::new();
        let mut undecodable = 0u64;
        self.scan(
            entity_type,
            range,
            limit,
            |key, value| match Record::from_bytes(value) {
                Ok(record) => Ok(filter(&record)),
                Err(e) => {
                    debug!(entity_type = %entity_type, key, error = %e, "Undecodable record");
                    undecodable += 1;
                    Ok(false)
                }
            },
            &mut keys,
        )?;
        if undecodable > 0 {
            warn!(entity_type = %entity_type, undecodable, "Skipped undecodable records during scan");
        }
        Ok(keys)
    }

    fn scan<F>(
        &self,
        entity_type: &EntityType,
        range: KeyRange,
        limit: Option<usize>,
        mut accept: F,
        out: &mut Vec<PrimaryKey>,
    ) -> Result<(), StorageError>
    where
        F: FnMut(PrimaryKey, &[u8]) -> Result<bool, StorageError>,
    {
        if limit == Some(0) {
            return Ok(());
        }
        let cf = self.cf(CF_RECORDS)?;
        let prefix = RecordKey::type_prefix(entity_type);
        let seek = RecordKey::seek(entity_type, range.start.unwrap_or(0));
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&seek, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            // Stop if we've passed this type's prefix
            if !key.starts_with(&prefix) {
                break;
            }
            let primary_key = RecordKey::from_bytes(&key)?.key;
            if range.end.is_some_and(|end| primary_key > end) {
                break;
            }
            if accept(primary_key, &value[..])? {
                out.push(primary_key);
                if limit.is_some_and(|limit| out.len() >= limit) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Number of stored records of a type.
    pub fn count_records(&self, entity_type: &EntityType) -> Result<u64, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let prefix = RecordKey::type_prefix(entity_type);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ==================== Checkpoint Methods ====================

    /// Persist a partition checkpoint in one atomic write.
    pub fn put_checkpoint(
        &self,
        job_name: &str,
        checkpoint: &CheckpointRecord,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(job_name, checkpoint.partition_id.clone());

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key.to_bytes(), checkpoint.to_bytes()?);
        self.db.write(batch)?;

        debug!(
            job = %job_name,
            partition = %checkpoint.partition_id,
            chunk = checkpoint.last_committed_chunk,
            status = %checkpoint.status,
            "Stored checkpoint"
        );
        Ok(())
    }

    pub fn get_checkpoint(
        &self,
        job_name: &str,
        partition_id: &PartitionId,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let key = CheckpointKey::new(job_name, partition_id.clone());
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(CheckpointRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All checkpoints of a job in key order.
    pub fn list_checkpoints(&self, job_name: &str) -> Result<Vec<CheckpointRecord>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        let prefix = CheckpointKey::job_prefix(job_name);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut checkpoints = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            checkpoints.push(CheckpointRecord::from_bytes(&value)?);
        }
        Ok(checkpoints)
    }

    // ==================== Job Methods ====================

    pub fn put_job(&self, job: &JobExecution) -> Result<(), StorageError> {
        let cf = self.cf(CF_JOBS)?;
        self.db
            .put_cf(cf, JobKey::new(&job.job_name).to_bytes(), job.to_bytes()?)?;
        debug!(job = %job.job_name, status = %job.status, "Stored job execution");
        Ok(())
    }

    pub fn get_job(&self, job_name: &str) -> Result<Option<JobExecution>, StorageError> {
        let cf = self.cf(CF_JOBS)?;
        match self.db.get_cf(cf, JobKey::new(job_name).to_bytes())? {
            Some(bytes) => Ok(Some(JobExecution::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_jobs(&self) -> Result<Vec<JobExecution>, StorageError> {
        let cf = self.cf(CF_JOBS)?;
        let mut jobs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            jobs.push(JobExecution::from_bytes(&value)?);
        }
        Ok(jobs)
    }

    /// Persist a partition plan, its initial checkpoints and the job
    /// execution in one atomic write.
    pub fn put_plan(
        &self,
        job: &JobExecution,
        plan: &PartitionPlan,
        checkpoints: &[CheckpointRecord],
    ) -> Result<(), StorageError> {
        let jobs_cf = self.cf(CF_JOBS)?;
        let plans_cf = self.cf(CF_PARTITIONS)?;
        let checkpoints_cf = self.cf(CF_CHECKPOINTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(plans_cf, PlanKey::new(&job.job_name).to_bytes(), plan.to_bytes()?);
        for checkpoint in checkpoints {
            let key = CheckpointKey::new(&job.job_name, checkpoint.partition_id.clone());
            batch.put_cf(checkpoints_cf, key.to_bytes(), checkpoint.to_bytes()?);
        }
        batch.put_cf(jobs_cf, JobKey::new(&job.job_name).to_bytes(), job.to_bytes()?);
        self.db.write(batch)?;

        info!(
            job = %job.job_name,
            partitions = plan.len(),
            "Stored partition plan"
        );
        Ok(())
    }

    pub fn get_plan(&self, job_name: &str) -> Result<Option<PartitionPlan>, StorageError> {
        let cf = self.cf(CF_PARTITIONS)?;
        match self.db.get_cf(cf, PlanKey::new(job_name).to_bytes())? {
            Some(bytes) => Ok(Some(PartitionPlan::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the job execution, plan and checkpoints of a job.
    /// Returns the number of checkpoints removed.
    pub fn delete_job_state(&self, job_name: &str) -> Result<usize, StorageError> {
        let jobs_cf = self.cf(CF_JOBS)?;
        let plans_cf = self.cf(CF_PARTITIONS)?;
        let checkpoints_cf = self.cf(CF_CHECKPOINTS)?;

        let prefix = CheckpointKey::job_prefix(job_name);
        let mut batch = WriteBatch::default();
        let mut count = 0;
        let iter = self
            .db
            .iterator_cf(checkpoints_cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(checkpoints_cf, &key);
            count += 1;
        }
        batch.delete_cf(plans_cf, PlanKey::new(job_name).to_bytes());
        batch.delete_cf(jobs_cf, JobKey::new(job_name).to_bytes());
        self.db.write(batch)?;

        info!(job = %job_name, checkpoints = count, "Deleted job state");
        Ok(count)
    }

    // ===== Admin Operations =====

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            record_count: self.count_cf_entries(CF_RECORDS)?,
            checkpoint_count: self.count_cf_entries(CF_CHECKPOINTS)?,
            job_count: self.count_cf_entries(CF_JOBS)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf_name: &str) -> Result<u64, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    pub record_count: u64,
    pub checkpoint_count: u64,
    pub job_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_families::ALL_CF_NAMES;
    use massindex_types::{JobStatus, Partition, PartitionStatus, ProgressCounts};
    use rand::seq::SliceRandom;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn ty(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    fn seed(storage: &Storage, name: &str, keys: impl IntoIterator<Item = u64>) {
        let records: Vec<Record> = keys
            .into_iter()
            .map(|k| Record::new(ty(name), k).with_field("even", k % 2 == 0))
            .collect();
        storage.put_records(&records).unwrap();
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let (storage, _temp) = create_test_storage();
        let record = Record::new(ty("Book"), 7).with_field("title", "Dune");
        storage.put_record(&record).unwrap();
        assert_eq!(storage.get_record(&ty("Book"), 7).unwrap(), Some(record));
        assert!(storage.get_record(&ty("Author"), 7).unwrap().is_none());

        storage.delete_record(&ty("Book"), 7).unwrap();
        assert!(storage.get_record(&ty("Book"), 7).unwrap().is_none());
    }

    #[test]
    fn test_scan_keys_is_ordered_and_isolated_per_type() {
        let (storage, _temp) = create_test_storage();
        let mut keys: Vec<u64> = (1..=200).collect();
        keys.shuffle(&mut rand::rng());
        seed(&storage, "Book", keys);
        seed(&storage, "BookReview", 1..=10);

        let all = storage
            .scan_keys(&ty("Book"), KeyRange::all(), None, |_| true)
            .unwrap();
        assert_eq!(all, (1..=200).collect::<Vec<_>>());

        let page = storage
            .scan_keys(&ty("Book"), KeyRange::between(50, 60), Some(5), |_| true)
            .unwrap();
        assert_eq!(page, vec![50, 51, 52, 53, 54]);

        let tail = storage
            .scan_keys(&ty("Book"), KeyRange { start: Some(195), end: None }, None, |k| k != 197)
            .unwrap();
        assert_eq!(tail, vec![195, 196, 198, 199, 200]);

        assert_eq!(storage.count_records(&ty("Book")).unwrap(), 200);
    }

    #[test]
    fn test_scan_records_filters_on_fields() {
        let (storage, _temp) = create_test_storage();
        seed(&storage, "Book", 1..=20);
        let even = storage
            .scan_records(&ty("Book"), KeyRange::all(), Some(3), |r| {
                r.field("even") == Some(&serde_json::Value::Bool(true))
            })
            .unwrap();
        assert_eq!(even, vec![2, 4, 6]);
    }

    #[test]
    fn test_load_records_aligned_with_keys() {
        let (storage, _temp) = create_test_storage();
        seed(&storage, "Book", [1, 2, 4]);
        let loaded = storage
            .load_records(&ty("Book"), &[4, 3, 1], CacheMode::Normal)
            .unwrap();
        let keys: Vec<Option<PrimaryKey>> = loaded
            .into_iter()
            .map(|slot| slot.unwrap().map(|r| r.key))
            .collect();
        assert_eq!(keys, vec![Some(4), None, Some(1)]);

        storage
            .load_records(&ty("Book"), &[4, 1], CacheMode::Normal)
            .unwrap();
        assert_eq!(storage.cache_stats().hits, 2);
    }

    #[test]
    fn test_undecodable_record_fails_only_its_slot() {
        let (storage, _temp) = create_test_storage();
        seed(&storage, "Book", [1, 2, 3]);
        storage.put_raw_record(&ty("Book"), 2, b"not json").unwrap();

        let loaded = storage
            .load_records(&ty("Book"), &[1, 2, 3], CacheMode::Normal)
            .unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].as_ref().unwrap().as_ref().map(|r| r.key), Some(1));
        assert!(matches!(loaded[1], Err(StorageError::Serialization(_))));
        assert_eq!(loaded[2].as_ref().unwrap().as_ref().map(|r| r.key), Some(3));

        // Nothing undecodable ends up cached
        let again = storage
            .load_records(&ty("Book"), &[2], CacheMode::Normal)
            .unwrap();
        assert!(again[0].is_err());
    }

    #[test]
    fn test_scan_records_skips_undecodable_values() {
        let (storage, _temp) = create_test_storage();
        seed(&storage, "Book", 1..=6);
        storage.put_raw_record(&ty("Book"), 3, b"\xff\x00").unwrap();

        let keys = storage
            .scan_records(&ty("Book"), KeyRange::all(), None, |_| true)
            .unwrap();
        assert_eq!(keys, vec![1, 2, 4, 5, 6]);

        let limited = storage
            .scan_records(&ty("Book"), KeyRange::all(), Some(3), |_| true)
            .unwrap();
        assert_eq!(limited, vec![1, 2, 4]);
    }

    #[test]
    fn test_checkpoint_roundtrip_and_listing() {
        let (storage, _temp) = create_test_storage();
        let mut record = CheckpointRecord::new(PartitionId::new(ty("Book"), 2));
        let mut counts = ProgressCounts::new();
        counts.record_indexed();
        record.advance(4, 8_000, &counts);
        storage.put_checkpoint("nightly", &record).unwrap();
        storage
            .put_checkpoint("nightly", &CheckpointRecord::new(PartitionId::new(ty("Book"), 1)))
            .unwrap();
        storage
            .put_checkpoint("other", &CheckpointRecord::new(PartitionId::new(ty("Book"), 1)))
            .unwrap();

        let loaded = storage
            .get_checkpoint("nightly", &PartitionId::new(ty("Book"), 2))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_committed_chunk, 4);
        assert_eq!(loaded.status, PartitionStatus::Checkpointed);

        let listed = storage.list_checkpoints("nightly").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].partition_id.index, 1);
    }

    #[test]
    fn test_plan_write_is_atomic_and_deletable() {
        let (storage, _temp) = create_test_storage();
        let mut job = JobExecution::new("nightly", vec![ty("Book")]);
        job.partitions_planned = true;
        let partition = Partition {
            id: PartitionId::new(ty("Book"), 1),
            first_key: 1,
            last_key: 10,
            key_count: 10,
            parallel: true,
        };
        let plan = PartitionPlan::new(vec![partition.clone()]);
        storage
            .put_plan(&job, &plan, &[CheckpointRecord::new(partition.id.clone())])
            .unwrap();

        assert_eq!(storage.get_plan("nightly").unwrap(), Some(plan));
        let stored = storage.get_job("nightly").unwrap().unwrap();
        assert!(stored.partitions_planned);
        assert_eq!(stored.status, JobStatus::Starting);
        assert_eq!(storage.list_jobs().unwrap().len(), 1);

        assert_eq!(storage.delete_job_state("nightly").unwrap(), 1);
        assert!(storage.get_job("nightly").unwrap().is_none());
        assert!(storage.get_plan("nightly").unwrap().is_none());
        assert!(storage.list_checkpoints("nightly").unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let (storage, _temp) = create_test_storage();
        seed(&storage, "Book", 1..=5);
        storage
            .put_job(&JobExecution::new("nightly", vec![ty("Book")]))
            .unwrap();
        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.record_count, 5);
        assert_eq!(stats.job_count, 1);
        assert_eq!(stats.checkpoint_count, 0);
    }
}
