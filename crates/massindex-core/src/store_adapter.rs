//! RocksDB-backed record source and checkpoint store.
//!
//! [`StorageSource`] enumerates keys and loads records from a
//! [`massindex_storage::Storage`]; [`StorageCheckpointStore`] persists job
//! state in the same database.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use massindex_storage::{Query, Storage, StorageError};
use massindex_types::{
    CheckpointRecord, EntityType, JobExecution, KeyRange, MassIndexError, PartitionId,
    PartitionPlan, Predicate, PrimaryKey, Record, Restriction,
};

use crate::checkpoint::CheckpointStore;
use crate::source::{LoadContext, LoadSession, RecordSource};

/// Record field compared against the job's tenant.
pub const TENANT_FIELD: &str = "tenant_id";

fn source_error(err: StorageError) -> MassIndexError {
    match err {
        StorageError::Query(msg) => MassIndexError::ScopeQuery(msg),
        other => MassIndexError::SourceUnavailable(other.to_string()),
    }
}

fn tenant_matches(record: &Record, tenant: Option<&str>) -> bool {
    match tenant {
        Some(tenant) => record
            .field(TENANT_FIELD)
            .and_then(|v| v.as_str())
            .is_some_and(|t| t == tenant),
        None => true,
    }
}

fn is_key_only(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::KeyRange { .. } => true,
        Predicate::FieldEquals { .. } | Predicate::FieldExists { .. } => false,
        Predicate::All { predicates } => predicates.iter().all(is_key_only),
    }
}

/// [`RecordSource`] over the records column family.
pub struct StorageSource {
    storage: Arc<Storage>,
}

impl StorageSource {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl RecordSource for StorageSource {
    fn fetch_keys(
        &self,
        entity_type: &EntityType,
        restriction: Option<&Restriction>,
        range: KeyRange,
        after: Option<PrimaryKey>,
        limit: Option<usize>,
        ctx: &LoadContext,
    ) -> Result<Vec<PrimaryKey>, MassIndexError> {
        let start = match after {
            Some(after) => match after.checked_add(1) {
                Some(next) => Some(range.start.map_or(next, |s| s.max(next))),
                None => return Ok(Vec::new()),
            },
            None => range.start,
        };
        let range = KeyRange {
            start,
            end: range.end,
        };
        let tenant = ctx.tenant();

        // Key-only predicates never need the record body
        if tenant.is_none() {
            let key_filter = match restriction {
                None => Some(None),
                Some(Restriction::Predicate(p)) if is_key_only(p) => Some(Some(p)),
                Some(Restriction::Predicate(_)) => None,
                Some(Restriction::Query(_)) => None,
            };
            if let Some(predicate) = key_filter {
                return self
                    .storage
                    .scan_keys(entity_type, range, limit, |key| {
                        predicate.is_none_or(|p| p.matches_key(key).unwrap_or(true))
                    })
                    .map_err(source_error);
            }
        }

        let query = match restriction {
            Some(Restriction::Query(q)) => Some(Query::parse(q).map_err(source_error)?),
            _ => None,
        };
        self.storage
            .scan_records(entity_type, range, limit, |record| {
                let restricted = match (restriction, &query) {
                    (Some(Restriction::Predicate(p)), _) => p.matches(record),
                    (_, Some(q)) => q.matches(record),
                    _ => true,
                };
                restricted && tenant_matches(record, tenant)
            })
            .map_err(source_error)
    }

    fn open_session(&self, ctx: &LoadContext) -> Result<Box<dyn LoadSession + '_>, MassIndexError> {
        Ok(Box::new(StorageSession {
            storage: &self.storage,
            ctx: ctx.clone(),
            loaded: HashMap::new(),
        }))
    }
}

/// Load session with a working set that lives until [`LoadSession::clear`].
struct StorageSession<'a> {
    storage: &'a Storage,
    ctx: LoadContext,
    loaded: HashMap<(EntityType, PrimaryKey), Record>,
}

impl LoadSession for StorageSession<'_> {
    fn load(
        &mut self,
        entity_type: &EntityType,
        keys: &[PrimaryKey],
    ) -> Result<Vec<Result<Record, MassIndexError>>, MassIndexError> {
        let missing: Vec<PrimaryKey> = keys
            .iter()
            .copied()
            .filter(|k| !self.loaded.contains_key(&(entity_type.clone(), *k)))
            .collect();
        let mut undecodable: HashMap<PrimaryKey, StorageError> = HashMap::new();
        if !missing.is_empty() {
            let fetched = self
                .storage
                .load_records(entity_type, &missing, self.ctx.cache_mode)
                .map_err(source_error)?;
            for (key, slot) in missing.iter().zip(fetched) {
                match slot {
                    Ok(Some(record)) => {
                        self.loaded.insert((entity_type.clone(), *key), record);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        undecodable.insert(*key, e);
                    }
                }
            }
        }

        Ok(keys
            .iter()
            .map(|key| {
                if let Some(record) = self.loaded.get(&(entity_type.clone(), *key)) {
                    return Ok(record.clone());
                }
                Err(MassIndexError::RecordLoad(match undecodable.get(key) {
                    Some(e) => format!("{} {} could not be decoded: {}", entity_type, key, e),
                    None => format!("{} {} disappeared after enumeration", entity_type, key),
                }))
            })
            .collect())
    }

    fn clear(&mut self) {
        if !self.loaded.is_empty() {
            debug!(records = self.loaded.len(), "Clearing load session");
        }
        self.loaded.clear();
    }
}

fn persist_error(err: StorageError) -> MassIndexError {
    MassIndexError::CheckpointPersist(err.to_string())
}

/// [`CheckpointStore`] in the jobs, partitions and checkpoints column families.
pub struct StorageCheckpointStore {
    storage: Arc<Storage>,
}

impl StorageCheckpointStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl CheckpointStore for StorageCheckpointStore {
    fn load_job(&self, job_name: &str) -> Result<Option<JobExecution>, MassIndexError> {
        self.storage.get_job(job_name).map_err(persist_error)
    }

    fn save_job(&self, job: &JobExecution) -> Result<(), MassIndexError> {
        self.storage.put_job(job).map_err(persist_error)
    }

    fn load_plan(&self, job_name: &str) -> Result<Option<PartitionPlan>, MassIndexError> {
        self.storage.get_plan(job_name).map_err(persist_error)
    }

    fn save_plan(
        &self,
        job: &JobExecution,
        plan: &PartitionPlan,
        checkpoints: &[CheckpointRecord],
    ) -> Result<(), MassIndexError> {
        self.storage
            .put_plan(job, plan, checkpoints)
            .map_err(persist_error)
    }

    fn load_checkpoint(
        &self,
        job_name: &str,
        partition: &PartitionId,
    ) -> Result<Option<CheckpointRecord>, MassIndexError> {
        self.storage
            .get_checkpoint(job_name, partition)
            .map_err(persist_error)
    }

    fn save_checkpoint(
        &self,
        job_name: &str,
        record: &CheckpointRecord,
    ) -> Result<(), MassIndexError> {
        self.storage
            .put_checkpoint(job_name, record)
            .map_err(persist_error)
    }

    fn list_checkpoints(&self, job_name: &str) -> Result<Vec<CheckpointRecord>, MassIndexError> {
        self.storage.list_checkpoints(job_name).map_err(persist_error)
    }

    fn clear_job(&self, job_name: &str) -> Result<(), MassIndexError> {
        let removed = self
            .storage
            .delete_job_state(job_name)
            .map_err(persist_error)?;
        debug!(job = job_name, removed, "Cleared job state");
        Ok(())
    }
}
