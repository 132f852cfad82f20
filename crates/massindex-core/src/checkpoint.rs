//! Partition checkpoints and job-runtime persistence.
//!
//! The [`CheckpointManager`] is the only writer of [`CheckpointRecord`]s.
//! Every mutation is persisted with one store write before the in-memory
//! record is updated, so a failed write leaves the previous checkpoint in
//! force.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use massindex_types::{
    CheckpointRecord, JobExecution, MassIndexError, PartitionId, PartitionPlan, PartitionStatus,
    PrimaryKey, ProgressCounts,
};

/// Persistence of job runtime state.
///
/// Write failures must be reported as [`MassIndexError::CheckpointPersist`].
pub trait CheckpointStore: Send + Sync {
    fn load_job(&self, job_name: &str) -> Result<Option<JobExecution>, MassIndexError>;

    fn save_job(&self, job: &JobExecution) -> Result<(), MassIndexError>;

    fn load_plan(&self, job_name: &str) -> Result<Option<PartitionPlan>, MassIndexError>;

    /// Store the plan, its initial checkpoints and the job in one write.
    fn save_plan(
        &self,
        job: &JobExecution,
        plan: &PartitionPlan,
        checkpoints: &[CheckpointRecord],
    ) -> Result<(), MassIndexError>;

    fn load_checkpoint(
        &self,
        job_name: &str,
        partition: &PartitionId,
    ) -> Result<Option<CheckpointRecord>, MassIndexError>;

    fn save_checkpoint(
        &self,
        job_name: &str,
        record: &CheckpointRecord,
    ) -> Result<(), MassIndexError>;

    fn list_checkpoints(&self, job_name: &str) -> Result<Vec<CheckpointRecord>, MassIndexError>;

    /// Forget the job, its plan and its checkpoints.
    fn clear_job(&self, job_name: &str) -> Result<(), MassIndexError>;
}

#[derive(Default)]
struct MemoryState {
    jobs: BTreeMap<String, JobExecution>,
    plans: BTreeMap<String, PartitionPlan>,
    checkpoints: BTreeMap<(String, PartitionId), CheckpointRecord>,
}

/// Volatile [`CheckpointStore`] for embedding and tests.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load_job(&self, job_name: &str) -> Result<Option<JobExecution>, MassIndexError> {
        Ok(self.state().jobs.get(job_name).cloned())
    }

    fn save_job(&self, job: &JobExecution) -> Result<(), MassIndexError> {
        self.state()
            .jobs
            .insert(job.job_name.clone(), job.clone());
        Ok(())
    }

    fn load_plan(&self, job_name: &str) -> Result<Option<PartitionPlan>, MassIndexError> {
        Ok(self.state().plans.get(job_name).cloned())
    }

    fn save_plan(
        &self,
        job: &JobExecution,
        plan: &PartitionPlan,
        checkpoints: &[CheckpointRecord],
    ) -> Result<(), MassIndexError> {
        let mut state = self.state();
        state.plans.insert(job.job_name.clone(), plan.clone());
        for record in checkpoints {
            state.checkpoints.insert(
                (job.job_name.clone(), record.partition_id.clone()),
                record.clone(),
            );
        }
        state.jobs.insert(job.job_name.clone(), job.clone());
        Ok(())
    }

    fn load_checkpoint(
        &self,
        job_name: &str,
        partition: &PartitionId,
    ) -> Result<Option<CheckpointRecord>, MassIndexError> {
        Ok(self
            .state()
            .checkpoints
            .get(&(job_name.to_string(), partition.clone()))
            .cloned())
    }

    fn save_checkpoint(
        &self,
        job_name: &str,
        record: &CheckpointRecord,
    ) -> Result<(), MassIndexError> {
        self.state().checkpoints.insert(
            (job_name.to_string(), record.partition_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn list_checkpoints(&self, job_name: &str) -> Result<Vec<CheckpointRecord>, MassIndexError> {
        Ok(self
            .state()
            .checkpoints
            .iter()
            .filter(|((job, _), _)| job == job_name)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn clear_job(&self, job_name: &str) -> Result<(), MassIndexError> {
        let mut state = self.state();
        state.jobs.remove(job_name);
        state.plans.remove(job_name);
        state.checkpoints.retain(|(job, _), _| job != job_name);
        Ok(())
    }
}

/// Where a partition picks up on (re)start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Already completed; skip it
    Skip,
    /// Run from `chunk`, enumerating keys strictly after `after_key`
    From {
        chunk: u32,
        after_key: Option<PrimaryKey>,
    },
}

/// Owns checkpoint state transitions for one job.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    job_name: String,
}

fn persist_error(err: MassIndexError) -> MassIndexError {
    match err {
        MassIndexError::CheckpointPersist(_) => err,
        other => MassIndexError::CheckpointPersist(other.to_string()),
    }
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, job_name: impl Into<String>) -> Self {
        Self {
            store,
            job_name: job_name.into(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Current record of a partition, if one was ever written.
    pub fn load(&self, partition: &PartitionId) -> Result<Option<CheckpointRecord>, MassIndexError> {
        self.store
            .load_checkpoint(&self.job_name, partition)
            .map_err(persist_error)
    }

    pub fn resume_point(&self, partition: &PartitionId) -> Result<ResumePoint, MassIndexError> {
        Ok(match self.load(partition)? {
            Some(record) if record.status == PartitionStatus::Completed => ResumePoint::Skip,
            Some(record) => ResumePoint::From {
                chunk: record.next_chunk(),
                after_key: record.last_committed_key,
            },
            None => ResumePoint::From {
                chunk: 1,
                after_key: None,
            },
        })
    }

    /// Move a partition to `Running`, creating its record if needed.
    pub fn begin(&self, partition: &PartitionId) -> Result<CheckpointRecord, MassIndexError> {
        let mut record = self
            .load(partition)?
            .unwrap_or_else(|| CheckpointRecord::new(partition.clone()));
        self.transition(&mut record, PartitionStatus::Running)?;
        debug!(
            partition = %partition,
            next_chunk = record.next_chunk(),
            "Partition checkpoint opened"
        );
        Ok(record)
    }

    /// Record `chunk` as fully committed.
    ///
    /// `chunk` must be the chunk directly after the last committed one.
    pub fn commit_chunk(
        &self,
        record: &mut CheckpointRecord,
        chunk: u32,
        last_key: PrimaryKey,
        counts: &ProgressCounts,
    ) -> Result<(), MassIndexError> {
        if chunk <= record.last_committed_chunk {
            return Err(MassIndexError::CheckpointPersist(format!(
                "{}: chunk {} does not advance past committed chunk {}",
                record.partition_id, chunk, record.last_committed_chunk
            )));
        }
        if record
            .last_committed_key
            .is_some_and(|committed| last_key <= committed)
        {
            return Err(MassIndexError::CheckpointPersist(format!(
                "{}: key {} does not advance past committed key",
                record.partition_id, last_key
            )));
        }
        if !record
            .status
            .can_transition_to(PartitionStatus::Checkpointed)
        {
            return Err(invalid_transition(record, PartitionStatus::Checkpointed));
        }

        let mut next = record.clone();
        next.advance(chunk, last_key, counts);
        self.store
            .save_checkpoint(&self.job_name, &next)
            .map_err(persist_error)?;
        *record = next;
        Ok(())
    }

    pub fn complete(&self, record: &mut CheckpointRecord) -> Result<(), MassIndexError> {
        self.transition(record, PartitionStatus::Completed)
    }

    pub fn fail(&self, record: &mut CheckpointRecord) -> Result<(), MassIndexError> {
        self.transition(record, PartitionStatus::Failed)
    }

    pub fn abandon(&self, record: &mut CheckpointRecord) -> Result<(), MassIndexError> {
        self.transition(record, PartitionStatus::Abandoned)
    }

    fn transition(
        &self,
        record: &mut CheckpointRecord,
        status: PartitionStatus,
    ) -> Result<(), MassIndexError> {
        if !record.status.can_transition_to(status) {
            warn!(
                partition = %record.partition_id,
                from = %record.status,
                to = %status,
                "Rejected checkpoint transition"
            );
            return Err(invalid_transition(record, status));
        }
        let mut next = record.clone();
        next.set_status(status);
        self.store
            .save_checkpoint(&self.job_name, &next)
            .map_err(persist_error)?;
        *record = next;
        Ok(())
    }
}

fn invalid_transition(record: &CheckpointRecord, to: PartitionStatus) -> MassIndexError {
    MassIndexError::CheckpointPersist(format!(
        "{}: invalid transition {} -> {}",
        record.partition_id, record.status, to
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FailingCheckpointStore;
    use massindex_types::EntityType;

    fn partition(index: u32) -> PartitionId {
        PartitionId::new(EntityType::new("Book").unwrap(), index)
    }

    fn manager() -> CheckpointManager {
        CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()), "nightly")
    }

    fn one_indexed() -> ProgressCounts {
        let mut counts = ProgressCounts::new();
        counts.record_indexed();
        counts
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let manager = manager();
        let id = partition(1);
        assert_eq!(
            manager.resume_point(&id).unwrap(),
            ResumePoint::From {
                chunk: 1,
                after_key: None
            }
        );

        let mut record = manager.begin(&id).unwrap();
        assert_eq!(record.status, PartitionStatus::Running);
        manager.commit_chunk(&mut record, 1, 2_000, &one_indexed()).unwrap();
        manager.commit_chunk(&mut record, 2, 4_000, &one_indexed()).unwrap();
        manager.complete(&mut record).unwrap();

        let stored = manager.load(&id).unwrap().unwrap();
        assert_eq!(stored.status, PartitionStatus::Completed);
        assert_eq!(stored.last_committed_chunk, 2);
        assert_eq!(stored.counts.indexed, 2);
        assert_eq!(manager.resume_point(&id).unwrap(), ResumePoint::Skip);
        assert!(manager.begin(&id).is_err());
    }

    #[test]
    fn test_commit_rejects_non_increasing_chunk() {
        let manager = manager();
        let mut record = manager.begin(&partition(1)).unwrap();
        manager.commit_chunk(&mut record, 1, 10, &one_indexed()).unwrap();
        assert!(manager.commit_chunk(&mut record, 1, 20, &one_indexed()).is_err());
        assert!(manager.commit_chunk(&mut record, 2, 10, &one_indexed()).is_err());
        assert_eq!(record.last_committed_chunk, 1);
    }

    #[test]
    fn test_resume_after_failure_and_abandon() {
        let manager = manager();
        let id = partition(2);
        let mut record = manager.begin(&id).unwrap();
        for chunk in 1..=4 {
            manager
                .commit_chunk(&mut record, chunk, chunk as u64 * 100, &one_indexed())
                .unwrap();
        }
        manager.fail(&mut record).unwrap();
        assert_eq!(
            manager.resume_point(&id).unwrap(),
            ResumePoint::From {
                chunk: 5,
                after_key: Some(400)
            }
        );

        let mut record = manager.begin(&id).unwrap();
        assert_eq!(record.next_chunk(), 5);
        manager.abandon(&mut record).unwrap();
        let record = manager.begin(&id).unwrap();
        assert_eq!(record.counts.indexed, 4);
    }

    #[test]
    fn test_planned_cannot_complete_directly() {
        let manager = manager();
        let mut record = CheckpointRecord::new(partition(1));
        assert!(manager.complete(&mut record).is_err());
        assert_eq!(record.status, PartitionStatus::Planned);
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let store = Arc::new(FailingCheckpointStore::new(MemoryCheckpointStore::new()));
        let manager = CheckpointManager::new(store.clone(), "nightly");
        let id = partition(1);
        let mut record = manager.begin(&id).unwrap();
        manager.commit_chunk(&mut record, 1, 50, &one_indexed()).unwrap();

        store.fail_writes(true);
        let err = manager
            .commit_chunk(&mut record, 2, 100, &one_indexed())
            .unwrap_err();
        assert!(matches!(err, MassIndexError::CheckpointPersist(_)));
        assert_eq!(record.last_committed_chunk, 1);

        store.fail_writes(false);
        assert_eq!(manager.load(&id).unwrap().unwrap().last_committed_key, Some(50));
    }

    #[test]
    fn test_memory_store_job_state() {
        let store = MemoryCheckpointStore::new();
        let job = JobExecution::new("nightly", vec![EntityType::new("Book").unwrap()]);
        let plan = PartitionPlan::default();
        store
            .save_plan(&job, &plan, &[CheckpointRecord::new(partition(1))])
            .unwrap();
        store
            .save_checkpoint("other", &CheckpointRecord::new(partition(1)))
            .unwrap();

        assert!(store.load_job("nightly").unwrap().is_some());
        assert_eq!(store.load_plan("nightly").unwrap(), Some(plan));
        assert_eq!(store.list_checkpoints("nightly").unwrap().len(), 1);

        store.clear_job("nightly").unwrap();
        assert!(store.load_job("nightly").unwrap().is_none());
        assert!(store.list_checkpoints("nightly").unwrap().is_empty());
        assert_eq!(store.list_checkpoints("other").unwrap().len(), 1);
    }
}
