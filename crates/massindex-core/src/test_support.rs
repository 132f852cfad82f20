//! In-memory fakes shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use massindex_storage::Query;
use massindex_types::{
    CheckpointRecord, EntityType, IndexDocument, JobExecution, KeyRange, MassIndexError,
    PartitionId, PartitionPlan, PrimaryKey, Record, Restriction,
};

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::progress::{ProgressEvent, ProgressMonitor};
use crate::sink::IndexSink;
use crate::source::{LoadContext, LoadSession, RecordSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Record source over a map, with failure injection and call recording.
#[derive(Default)]
pub struct InMemorySource {
    records: Mutex<HashMap<EntityType, BTreeMap<PrimaryKey, Record>>>,
    failing_keys: Mutex<HashSet<PrimaryKey>>,
    loads_before_outage: Mutex<Option<usize>>,
    scrambled: AtomicBool,
    fetch_limits: Mutex<Vec<Option<usize>>>,
    load_batch_sizes: Mutex<Vec<usize>>,
    loads: AtomicUsize,
    session_clears: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one record with a generated title per key.
    pub fn insert_keys(&self, entity_type: &EntityType, keys: impl IntoIterator<Item = PrimaryKey>) {
        let mut records = lock(&self.records);
        let table = records.entry(entity_type.clone()).or_default();
        for key in keys {
            let record = Record::new(entity_type.clone(), key)
                .with_field("title", format!("{} {}", entity_type, key));
            table.insert(key, record);
        }
    }

    pub fn insert_record(&self, record: Record) {
        lock(&self.records)
            .entry(record.entity_type.clone())
            .or_default()
            .insert(record.key, record);
    }

    pub fn remove_key(&self, entity_type: &EntityType, key: PrimaryKey) {
        if let Some(table) = lock(&self.records).get_mut(entity_type) {
            table.remove(&key);
        }
    }

    /// Loading any of these keys yields a per-record error.
    pub fn fail_keys(&self, keys: impl IntoIterator<Item = PrimaryKey>) {
        lock(&self.failing_keys).extend(keys);
    }

    /// The first `loads` batch loads succeed, every later one fails.
    pub fn fail_loads_after(&self, loads: usize) {
        *lock(&self.loads_before_outage) = Some(self.loads.load(Ordering::SeqCst) + loads);
    }

    pub fn clear_failures(&self) {
        lock(&self.failing_keys).clear();
        *lock(&self.loads_before_outage) = None;
    }

    /// Return every fetched page in descending order.
    pub fn scramble_pages(&self, scrambled: bool) {
        self.scrambled.store(scrambled, Ordering::SeqCst);
    }

    pub fn fetch_limits(&self) -> Vec<Option<usize>> {
        lock(&self.fetch_limits).clone()
    }

    pub fn load_batch_sizes(&self) -> Vec<usize> {
        lock(&self.load_batch_sizes).clone()
    }

    pub fn session_clears(&self) -> usize {
        self.session_clears.load(Ordering::SeqCst)
    }
}

impl RecordSource for InMemorySource {
    fn fetch_keys(
        &self,
        entity_type: &EntityType,
        restriction: Option<&Restriction>,
        range: KeyRange,
        after: Option<PrimaryKey>,
        limit: Option<usize>,
        _ctx: &LoadContext,
    ) -> Result<Vec<PrimaryKey>, MassIndexError> {
        lock(&self.fetch_limits).push(limit);
        let query = match restriction {
            Some(Restriction::Query(q)) => Some(Query::parse(q)?),
            _ => None,
        };

        let records = lock(&self.records);
        let mut keys: Vec<PrimaryKey> = records
            .get(entity_type)
            .into_iter()
            .flat_map(|table| table.values())
            .filter(|r| range.contains(r.key) && after.is_none_or(|a| r.key > a))
            .filter(|r| match restriction {
                Some(Restriction::Predicate(p)) => p.matches(r),
                _ => query.as_ref().is_none_or(|q| q.matches(r)),
            })
            .map(|r| r.key)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        if self.scrambled.load(Ordering::SeqCst) {
            keys.reverse();
        }
        Ok(keys)
    }

    fn open_session(&self, _ctx: &LoadContext) -> Result<Box<dyn LoadSession + '_>, MassIndexError> {
        Ok(Box::new(InMemorySession { source: self }))
    }
}

struct InMemorySession<'a> {
    source: &'a InMemorySource,
}

impl LoadSession for InMemorySession<'_> {
    fn load(
        &mut self,
        entity_type: &EntityType,
        keys: &[PrimaryKey],
    ) -> Result<Vec<Result<Record, MassIndexError>>, MassIndexError> {
        let call = self.source.loads.fetch_add(1, Ordering::SeqCst);
        if lock(&self.source.loads_before_outage).is_some_and(|allowed| call >= allowed) {
            return Err(MassIndexError::SourceUnavailable(
                "in-memory source is offline".to_string(),
            ));
        }
        lock(&self.source.load_batch_sizes).push(keys.len());

        let failing = lock(&self.source.failing_keys);
        let records = lock(&self.source.records);
        let table = records.get(entity_type);
        Ok(keys
            .iter()
            .map(|key| {
                if failing.contains(key) {
                    return Err(MassIndexError::RecordLoad(format!("{} {} is corrupt", entity_type, key)));
                }
                table
                    .and_then(|t| t.get(key))
                    .cloned()
                    .ok_or_else(|| MassIndexError::RecordLoad(format!("{} {} not found", entity_type, key)))
            })
            .collect())
    }

    fn clear(&mut self) {
        self.source.session_clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOp {
    Add(usize),
    Flush,
    Purge(EntityType),
    Optimize,
}

/// Index sink that records every call.
#[derive(Default)]
pub struct RecordingSink {
    ops: Mutex<Vec<SinkOp>>,
    documents: Mutex<Vec<IndexDocument>>,
    failing_flushes: AtomicUsize,
    flush_attempts: AtomicUsize,
    fail_optimize: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_flushes(&self, count: usize) {
        self.failing_flushes.store(count, Ordering::SeqCst);
    }

    pub fn fail_optimize(&self, fail: bool) {
        self.fail_optimize.store(fail, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    pub fn flush_attempts(&self) -> usize {
        self.flush_attempts.load(Ordering::SeqCst)
    }

    pub fn optimize_count(&self) -> usize {
        lock(&self.ops).iter().filter(|op| **op == SinkOp::Optimize).count()
    }

    pub fn document_count(&self) -> usize {
        lock(&self.documents).len()
    }

    /// Smallest record key among documents of `entity_type`.
    pub fn min_key(&self, entity_type: &EntityType) -> Option<PrimaryKey> {
        lock(&self.documents)
            .iter()
            .filter(|d| &d.entity_type == entity_type)
            .filter_map(|d| d.doc_id.rsplit(':').next()?.parse().ok())
            .min()
    }
}

impl IndexSink for RecordingSink {
    fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize, MassIndexError> {
        lock(&self.ops).push(SinkOp::Add(documents.len()));
        lock(&self.documents).extend_from_slice(documents);
        Ok(documents.len())
    }

    fn flush(&self) -> Result<(), MassIndexError> {
        self.flush_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_flushes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_flushes.store(failing - 1, Ordering::SeqCst);
            return Err(MassIndexError::Flush("disk full".to_string()));
        }
        lock(&self.ops).push(SinkOp::Flush);
        Ok(())
    }

    fn purge(&self, entity_type: &EntityType, _tenant_id: Option<&str>) -> Result<(), MassIndexError> {
        lock(&self.ops).push(SinkOp::Purge(entity_type.clone()));
        lock(&self.documents).retain(|d| &d.entity_type != entity_type);
        Ok(())
    }

    fn optimize(&self) -> Result<(), MassIndexError> {
        if self.fail_optimize.load(Ordering::SeqCst) {
            return Err(MassIndexError::Search("merge failed".to_string()));
        }
        lock(&self.ops).push(SinkOp::Optimize);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingMonitor {
    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }
}

impl ProgressMonitor for RecordingMonitor {
    fn on_event(&self, event: &ProgressEvent) {
        lock(&self.events).push(event.clone());
    }
}

/// Checkpoint store whose writes can be made to fail.
pub struct FailingCheckpointStore {
    inner: MemoryCheckpointStore,
    failing: AtomicBool,
    writes: AtomicUsize,
    allowed_writes: Mutex<Option<usize>>,
}

impl FailingCheckpointStore {
    pub fn new(inner: MemoryCheckpointStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            allowed_writes: Mutex::new(None),
        }
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Let the next `writes` writes through and fail every later one.
    pub fn fail_writes_after(&self, writes: usize) {
        *lock(&self.allowed_writes) = Some(self.writes.load(Ordering::SeqCst) + writes);
    }

    fn check_write(&self) -> Result<(), MassIndexError> {
        let written = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst)
            || lock(&self.allowed_writes).is_some_and(|allowed| written >= allowed)
        {
            return Err(MassIndexError::CheckpointPersist(
                "checkpoint volume is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

impl CheckpointStore for FailingCheckpointStore {
    fn load_job(&self, job_name: &str) -> Result<Option<JobExecution>, MassIndexError> {
        self.inner.load_job(job_name)
    }

    fn save_job(&self, job: &JobExecution) -> Result<(), MassIndexError> {
        self.check_write()?;
        self.inner.save_job(job)
    }

    fn load_plan(&self, job_name: &str) -> Result<Option<PartitionPlan>, MassIndexError> {
        self.inner.load_plan(job_name)
    }

    fn save_plan(
        &self,
        job: &JobExecution,
        plan: &PartitionPlan,
        checkpoints: &[CheckpointRecord],
    ) -> Result<(), MassIndexError> {
        self.check_write()?;
        self.inner.save_plan(job, plan, checkpoints)
    }

    fn load_checkpoint(
        &self,
        job_name: &str,
        partition: &PartitionId,
    ) -> Result<Option<CheckpointRecord>, MassIndexError> {
        self.inner.load_checkpoint(job_name, partition)
    }

    fn save_checkpoint(
        &self,
        job_name: &str,
        record: &CheckpointRecord,
    ) -> Result<(), MassIndexError> {
        self.check_write()?;
        self.inner.save_checkpoint(job_name, record)
    }

    fn list_checkpoints(&self, job_name: &str) -> Result<Vec<CheckpointRecord>, MassIndexError> {
        self.inner.list_checkpoints(job_name)
    }

    fn clear_job(&self, job_name: &str) -> Result<(), MassIndexError> {
        self.inner.clear_job(job_name)
    }
}
