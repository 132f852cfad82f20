//! Partition planning.
//!
//! Drains each type's key enumerator once and slices the sequence into
//! partitions of `rows_per_partition` keys, keeping only the boundaries.

use tracing::{debug, info};

use massindex_types::{
    EntityType, FetchSize, JobParameters, MassIndexError, Partition, PartitionId, PartitionPlan,
    PrimaryKey,
};

use crate::enumerator::KeyEnumerator;
use crate::scope::IndexingScope;
use crate::source::{LoadContext, RecordSource};

/// Slices entity types into partitions.
pub struct PartitionPlanner<'a> {
    source: &'a dyn RecordSource,
    ctx: &'a LoadContext,
    rows_per_partition: usize,
    fetch_size: FetchSize,
    max_results_per_entity: Option<u64>,
}

struct Slice {
    first: PrimaryKey,
    last: PrimaryKey,
    count: u64,
}

impl<'a> PartitionPlanner<'a> {
    pub fn new(source: &'a dyn RecordSource, ctx: &'a LoadContext, params: &JobParameters) -> Self {
        Self {
            source,
            ctx,
            rows_per_partition: params.rows_per_partition.max(1),
            fetch_size: params.fetch_size(),
            max_results_per_entity: params.max_results_per_entity,
        }
    }

    /// Plan every type of the scope, in scope order.
    pub fn plan(&self, scope: &IndexingScope) -> Result<PartitionPlan, MassIndexError> {
        let mut partitions = Vec::new();
        for entity_type in scope.entity_types() {
            partitions.extend(self.plan_type(scope, entity_type)?);
        }
        info!(
            types = scope.len(),
            partitions = partitions.len(),
            "Planned partitions"
        );
        Ok(PartitionPlan::new(partitions))
    }

    /// Plan one type. Zero matching keys yields zero partitions.
    pub fn plan_type(
        &self,
        scope: &IndexingScope,
        entity_type: &EntityType,
    ) -> Result<Vec<Partition>, MassIndexError> {
        let parallel = scope.is_parallel(entity_type);
        let group_size = if parallel {
            self.rows_per_partition as u64
        } else {
            u64::MAX
        };

        let keys = KeyEnumerator::new(self.source, entity_type, self.ctx)
            .with_restriction(scope.restriction(entity_type))
            .with_fetch_size(self.fetch_size)
            .with_cap(self.max_results_per_entity);

        let mut partitions = Vec::new();
        let mut current: Option<Slice> = None;
        for key in keys {
            let key = key?;
            match current.as_mut() {
                Some(slice) => {
                    slice.last = key;
                    slice.count += 1;
                }
                None => {
                    current = Some(Slice {
                        first: key,
                        last: key,
                        count: 1,
                    })
                }
            }
            if current.as_ref().is_some_and(|s| s.count == group_size) {
                if let Some(slice) = current.take() {
                    partitions.push(self.partition(entity_type, partitions.len(), slice, parallel));
                }
            }
        }
        if let Some(slice) = current.take() {
            partitions.push(self.partition(entity_type, partitions.len(), slice, parallel));
        }

        debug!(
            entity_type = %entity_type,
            partitions = partitions.len(),
            parallel,
            "Planned entity type"
        );
        Ok(partitions)
    }

    fn partition(
        &self,
        entity_type: &EntityType,
        planned: usize,
        slice: Slice,
        parallel: bool,
    ) -> Partition {
        Partition {
            id: PartitionId::new(entity_type.clone(), planned as u32 + 1),
            first_key: slice.first,
            last_key: slice.last,
            key_count: slice.count,
            parallel,
        }
    }
}
