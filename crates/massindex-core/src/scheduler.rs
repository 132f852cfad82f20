//! Bounded parallel execution of partitions.
//!
//! One coordinator thread per type slot takes the next queued entity type
//! and runs a scoped pool of loader threads over that type's partitions.
//! A type stays active until every one of its partitions is terminal.
//!
//! ```text
//! threads = types_in_parallel * (loaders_per_type + 1) <= max_threads
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, error, info};

use massindex_types::{EntityType, MassIndexError, Partition};

use crate::chunk::{PartitionOutcome, PartitionRunner};

/// Cooperative stop flag shared between the caller and every worker.
///
/// Setting it prevents new chunks from starting; in-flight chunks finish
/// and checkpoint normally.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Effective thread allocation after applying the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBudget {
    pub types_in_parallel: usize,
    pub loaders_per_type: usize,
    pub ceiling: usize,
}

impl ExecutionBudget {
    /// One loader plus one coordinator.
    pub const MIN_CEILING: usize = 2;

    /// Fit the requested parallelism under `max_threads`.
    ///
    /// Types are reduced first, to at most `ceiling / 2`, then loaders to
    /// `ceiling / types - 1`. Neither drops below one, so a ceiling under
    /// [`Self::MIN_CEILING`] is raised to it.
    pub fn plan(types_in_parallel: usize, loaders_per_type: usize, max_threads: usize) -> Self {
        let ceiling = max_threads.max(Self::MIN_CEILING);
        let types = types_in_parallel.max(1).min((ceiling / 2).max(1));
        let loaders = loaders_per_type
            .max(1)
            .min((ceiling / types).saturating_sub(1).max(1));
        Self {
            types_in_parallel: types,
            loaders_per_type: loaders,
            ceiling,
        }
    }

    pub fn total_threads(&self) -> usize {
        self.types_in_parallel * (self.loaders_per_type + 1)
    }
}

/// Partitions of one type waiting to run.
#[derive(Debug, Clone)]
pub struct TypeWork {
    pub entity_type: EntityType,
    pub partitions: Vec<Partition>,
}

/// Dispatches partitions to worker threads within an [`ExecutionBudget`].
pub struct Scheduler<'a> {
    budget: ExecutionBudget,
    runner: &'a dyn PartitionRunner,
    stop: &'a StopSignal,
}

struct Shared {
    outcomes: Mutex<Vec<PartitionOutcome>>,
    first_error: Mutex<Option<MassIndexError>>,
}

impl Shared {
    fn failed(&self) -> bool {
        self.first_error
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    fn record_error(&self, err: MassIndexError) {
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(budget: ExecutionBudget, runner: &'a dyn PartitionRunner, stop: &'a StopSignal) -> Self {
        Self {
            budget,
            runner,
            stop,
        }
    }

    pub fn budget(&self) -> ExecutionBudget {
        self.budget
    }

    /// Run every partition, types in queue order.
    ///
    /// Partitions not started because of a stop or a job-fatal error are
    /// left untouched. The first job-fatal error is returned after all
    /// threads have joined.
    pub fn run(&self, work: Vec<TypeWork>) -> Result<Vec<PartitionOutcome>, MassIndexError> {
        let work: Vec<TypeWork> = work.into_iter().filter(|w| !w.partitions.is_empty()).collect();
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let coordinators = self.budget.types_in_parallel.min(work.len());
        info!(
            types = work.len(),
            coordinators,
            loaders_per_type = self.budget.loaders_per_type,
            max_threads = self.budget.ceiling,
            "Starting partition scheduler"
        );

        let (type_tx, type_rx) = bounded(work.len());
        for item in work {
            // Capacity equals the queue length
            let _ = type_tx.send(item);
        }
        drop(type_tx);

        let shared = Shared {
            outcomes: Mutex::new(Vec::new()),
            first_error: Mutex::new(None),
        };

        thread::scope(|scope| {
            for _ in 0..coordinators {
                let type_rx = type_rx.clone();
                let shared = &shared;
                scope.spawn(move || self.coordinate(type_rx, shared));
            }
        });

        let Shared {
            outcomes,
            first_error,
        } = shared;
        if let Some(err) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
            return Err(err);
        }
        Ok(outcomes.into_inner().unwrap_or_else(|e| e.into_inner()))
    }

    fn coordinate(&self, types: Receiver<TypeWork>, shared: &Shared) {
        while let Ok(work) = types.recv() {
            if self.stop.is_stopped() || shared.failed() {
                break;
            }
            let loaders = self.budget.loaders_per_type.min(work.partitions.len());
            debug!(entity_type = %work.entity_type, loaders, "Type activated");

            let (tx, rx) = bounded(work.partitions.len());
            for partition in work.partitions {
                let _ = tx.send(partition);
            }
            drop(tx);

            thread::scope(|scope| {
                for _ in 0..loaders {
                    let rx = rx.clone();
                    scope.spawn(move || self.load(rx, shared));
                }
            });
            debug!(entity_type = %work.entity_type, "Type inactive");
        }
    }

    fn load(&self, partitions: Receiver<Partition>, shared: &Shared) {
        while let Ok(partition) = partitions.recv() {
            if self.stop.is_stopped() || shared.failed() {
                break;
            }
            match self.runner.run(&partition) {
                Ok(outcome) => shared
                    .outcomes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(outcome),
                Err(e) => {
                    error!(partition = %partition.id, error = %e, "Job-fatal error, halting");
                    shared.record_error(e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use massindex_types::{PartitionId, PartitionStatus, ProgressCounts};

    #[test]
    fn test_budget_formula() {
        // Plenty of room: request kept
        let b = ExecutionBudget::plan(2, 3, 100);
        assert_eq!((b.types_in_parallel, b.loaders_per_type), (2, 3));

        // Loaders reduced to ceiling / types - 1
        let b = ExecutionBudget::plan(1, 6, 3);
        assert_eq!((b.types_in_parallel, b.loaders_per_type), (1, 2));

        // Types reduced first
        let b = ExecutionBudget::plan(5, 6, 7);
        assert_eq!((b.types_in_parallel, b.loaders_per_type), (3, 1));

        // Below the minimum ceiling: one coordinator, one loader
        let b = ExecutionBudget::plan(4, 4, 1);
        assert_eq!((b.types_in_parallel, b.loaders_per_type, b.ceiling), (1, 1, 2));
    }

    #[test]
    fn test_budget_never_exceeds_ceiling() {
        for max in 0..64 {
            for types in 0..10 {
                for loaders in 0..10 {
                    let b = ExecutionBudget::plan(types, loaders, max);
                    assert!(b.total_threads() <= b.ceiling, "{b:?}");
                    assert!(b.types_in_parallel >= 1 && b.loaders_per_type >= 1);
                    assert!(b.types_in_parallel <= types.max(1));
                    assert!(b.loaders_per_type <= loaders.max(1));
                }
            }
        }
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_stopped());
        clone.request_stop();
        assert!(signal.is_stopped());
    }

    /// Counts concurrently running partitions.
    struct ProbeRunner {
        active: AtomicUsize,
        peak: AtomicUsize,
        active_per_type: Mutex<std::collections::HashMap<EntityType, usize>>,
        peak_types: AtomicUsize,
        fail_on: Option<PartitionId>,
    }

    impl ProbeRunner {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                active_per_type: Mutex::new(Default::default()),
                peak_types: AtomicUsize::new(0),
                fail_on: None,
            }
        }
    }

    impl PartitionRunner for ProbeRunner {
        fn run(&self, partition: &Partition) -> Result<PartitionOutcome, MassIndexError> {
            if self.fail_on.as_ref() == Some(&partition.id) {
                return Err(MassIndexError::CheckpointPersist("disk full".to_string()));
            }
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            {
                let mut per_type = self.active_per_type.lock().unwrap();
                *per_type.entry(partition.entity_type().clone()).or_default() += 1;
                let types = per_type.values().filter(|n| **n > 0).count();
                self.peak_types.fetch_max(types, Ordering::SeqCst);
            }

            thread::sleep(Duration::from_millis(5));

            *self
                .active_per_type
                .lock()
                .unwrap()
                .get_mut(partition.entity_type())
                .unwrap() -= 1;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(PartitionOutcome {
                partition: partition.id.clone(),
                status: PartitionStatus::Completed,
                counts: ProgressCounts::new(),
                last_committed_chunk: 1,
                chunks_committed: 1,
                error: None,
            })
        }
    }

    fn work(types: &[&str], partitions_per_type: u32) -> Vec<TypeWork> {
        types
            .iter()
            .map(|name| {
                let entity_type = EntityType::new(name).unwrap();
                TypeWork {
                    partitions: (1..=partitions_per_type)
                        .map(|index| Partition {
                            id: PartitionId::new(entity_type.clone(), index),
                            first_key: index as u64,
                            last_key: index as u64,
                            key_count: 1,
                            parallel: true,
                        })
                        .collect(),
                    entity_type,
                }
            })
            .collect()
    }

    #[test]
    fn test_concurrency_stays_within_budget() {
        let runner = ProbeRunner::new();
        let stop = StopSignal::new();
        let budget = ExecutionBudget::plan(2, 3, 8);
        assert_eq!(budget.total_threads(), 8);

        let outcomes = Scheduler::new(budget, &runner, &stop)
            .run(work(&["Book", "Author", "Publisher"], 8))
            .unwrap();

        assert_eq!(outcomes.len(), 24);
        let peak = runner.peak.load(Ordering::SeqCst);
        assert!(peak <= budget.types_in_parallel * budget.loaders_per_type, "peak {peak}");
        assert!(runner.peak_types.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_fatal_error_halts_and_is_returned() {
        let mut runner = ProbeRunner::new();
        runner.fail_on = Some(PartitionId::new(EntityType::new("Book").unwrap(), 1));
        let stop = StopSignal::new();
        let budget = ExecutionBudget::plan(1, 1, 2);

        let result = Scheduler::new(budget, &runner, &stop).run(work(&["Book", "Author"], 3));
        assert!(matches!(result, Err(MassIndexError::CheckpointPersist(_))));
        assert_eq!(runner.peak.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stopped_scheduler_dispatches_nothing() {
        let runner = ProbeRunner::new();
        let stop = StopSignal::new();
        stop.request_stop();
        let outcomes = Scheduler::new(ExecutionBudget::plan(1, 6, 10), &runner, &stop)
            .run(work(&["Book"], 4))
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_empty_work() {
        let runner = ProbeRunner::new();
        let stop = StopSignal::new();
        let outcomes = Scheduler::new(ExecutionBudget::plan(1, 1, 2), &runner, &stop)
            .run(vec![TypeWork {
                entity_type: EntityType::new("Book").unwrap(),
                partitions: Vec::new(),
            }])
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
