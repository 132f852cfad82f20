//! Mass-indexing job orchestration.
//!
//! [`MassIndexingJob::run`] sequences one job instance:
//!
//! 1. resolve parameters, scope and record source
//! 2. detect a restart by job name
//! 3. purge every in-scope type (once per job instance)
//! 4. optimize after the purge (once per job instance)
//! 5. plan partitions, or reload the persisted plan on restart
//! 6. run every non-completed partition through the [`Scheduler`]
//! 7. optimize once every partition has completed
//!
//! Purge and the first optimize finish before any partition starts; the
//! final optimize starts only after the scheduler has joined all workers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use massindex_types::{
    CheckpointRecord, EntityType, JobExecution, JobParameters, JobStatus, MassIndexError,
    PartitionId, PartitionPlan, PartitionStatus, ProgressCounts,
};

use crate::checkpoint::{CheckpointManager, CheckpointStore, ResumePoint};
use crate::chunk::{ChunkProcessor, ChunkSettings, SkipPolicy};
use crate::converter::ConverterRegistry;
use crate::planner::PartitionPlanner;
use crate::progress::{NoOpProgressMonitor, OptimizePhase, ProgressEvent, ProgressMonitor};
use crate::scheduler::{ExecutionBudget, Scheduler, StopSignal, TypeWork};
use crate::scope::{IndexingScope, ScopeResolver};
use crate::sink::{FlushGate, IndexSink};
use crate::source::{LoadContext, RecordSource, StoreResolver};

/// Counters of one partition at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub partition: PartitionId,
    pub status: PartitionStatus,
    pub last_committed_chunk: u32,
    pub counts: ProgressCounts,
}

/// Counters of one entity type at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeReport {
    pub entity_type: EntityType,
    pub partitions: usize,
    pub counts: ProgressCounts,
}

/// Final status of a job run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_name: String,
    pub execution_id: String,
    pub status: JobStatus,
    pub restart_count: u32,
    pub types: Vec<TypeReport>,
    pub partitions: Vec<PartitionReport>,
    pub error: Option<String>,
}

impl JobReport {
    pub fn totals(&self) -> ProgressCounts {
        let mut totals = ProgressCounts::new();
        for t in &self.types {
            totals.merge(&t.counts);
        }
        totals
    }

    pub fn partition(&self, id: &PartitionId) -> Option<&PartitionReport> {
        self.partitions.iter().find(|p| &p.partition == id)
    }

    pub fn entity_type(&self, entity_type: &EntityType) -> Option<&TypeReport> {
        self.types.iter().find(|t| &t.entity_type == entity_type)
    }

    fn build(job: &JobExecution, plan: &PartitionPlan, records: Vec<CheckpointRecord>) -> Self {
        let partitions: Vec<PartitionReport> = plan
            .partitions
            .iter()
            .map(|partition| {
                let record = records
                    .iter()
                    .find(|r| r.partition_id == partition.id)
                    .cloned()
                    .unwrap_or_else(|| CheckpointRecord::new(partition.id.clone()));
                PartitionReport {
                    partition: partition.id.clone(),
                    status: record.status,
                    last_committed_chunk: record.last_committed_chunk,
                    counts: record.counts,
                }
            })
            .collect();

        let types = job
            .entity_types
            .iter()
            .map(|entity_type| {
                let mut counts = ProgressCounts::new();
                let mut count = 0;
                for p in partitions.iter().filter(|p| &p.partition.entity_type == entity_type) {
                    counts.merge(&p.counts);
                    count += 1;
                }
                TypeReport {
                    entity_type: entity_type.clone(),
                    partitions: count,
                    counts,
                }
            })
            .collect();

        Self {
            job_name: job.job_name.clone(),
            execution_id: job.execution_id.clone(),
            status: job.status,
            restart_count: job.restart_count,
            types,
            partitions,
            error: None,
        }
    }
}

/// One configured mass-indexing job.
pub struct MassIndexingJob {
    params: JobParameters,
    stores: Arc<dyn StoreResolver>,
    sink: Arc<dyn IndexSink>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    converters: ConverterRegistry,
    monitor: Arc<dyn ProgressMonitor>,
    stop: StopSignal,
    scope: Option<IndexingScope>,
    flush_gate: Option<FlushGate>,
    skip_policy: SkipPolicy,
}

impl MassIndexingJob {
    pub fn new(
        params: JobParameters,
        stores: Arc<dyn StoreResolver>,
        sink: Arc<dyn IndexSink>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            params,
            stores,
            sink,
            checkpoint_store,
            converters: ConverterRegistry::default(),
            monitor: Arc::new(NoOpProgressMonitor),
            stop: StopSignal::new(),
            scope: None,
            flush_gate: None,
            skip_policy: SkipPolicy::default(),
        }
    }

    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Use an explicit scope (with per-type restrictions) instead of
    /// resolving one from the job parameters.
    pub fn with_scope(mut self, scope: IndexingScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_flush_gate(mut self, flush_gate: FlushGate) -> Self {
        self.flush_gate = Some(flush_gate);
        self
    }

    pub fn with_skip_policy(mut self, skip_policy: SkipPolicy) -> Self {
        self.skip_policy = skip_policy;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run (or resume) the job.
    ///
    /// Configuration, scope and handle errors are returned before anything
    /// is persisted. Failures after the job execution exists end the run
    /// with a `Failed` report instead.
    pub fn run(&self) -> Result<JobReport, MassIndexError> {
        let params = self.params.clone().resolve()?;
        let scope = match &self.scope {
            Some(scope) => scope.clone(),
            None => ScopeResolver::resolve(&params)?,
        };
        let source = self.stores.resolve(
            params.entity_manager_factory_reference.as_deref(),
            params.entity_manager_factory_namespace.unwrap_or_default(),
        )?;
        let checkpoints = CheckpointManager::new(self.checkpoint_store.clone(), &params.job_name);

        let mut job = self.open_execution(&params, &scope)?;
        self.monitor.on_event(&ProgressEvent::JobStarted {
            job_name: job.job_name.clone(),
            execution_id: job.execution_id.clone(),
            restart_count: job.restart_count,
        });

        let result = self.execute(&params, &scope, source.as_ref(), &checkpoints, &mut job);
        let (plan, error) = match result {
            Ok(plan) => (plan, None),
            Err(e) => {
                warn!(job = %job.job_name, error = %e, "Mass indexing job failed");
                job.finish(JobStatus::Failed);
                if let Err(save_err) = self.checkpoint_store.save_job(&job) {
                    warn!(error = %save_err, "Could not record failed job state");
                }
                let plan = self
                    .checkpoint_store
                    .load_plan(&job.job_name)
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                (plan, Some(e))
            }
        };

        let records = self
            .checkpoint_store
            .list_checkpoints(&job.job_name)
            .unwrap_or_default();
        let mut report = JobReport::build(&job, &plan, records);
        report.error = error.map(|e| e.to_string());

        self.monitor.on_event(&ProgressEvent::JobFinished {
            status: report.status,
            counts: report.totals(),
        });
        Ok(report)
    }

    /// Reuse a restartable execution of the same job name or start fresh.
    fn open_execution(
        &self,
        params: &JobParameters,
        scope: &IndexingScope,
    ) -> Result<JobExecution, MassIndexError> {
        let entity_types: Vec<EntityType> = scope.entity_types().cloned().collect();
        let mut job = match self.checkpoint_store.load_job(&params.job_name)? {
            Some(mut previous) if previous.status.is_restartable() => {
                if previous.entity_types != entity_types {
                    return Err(MassIndexError::ScopeConfiguration(format!(
                        "job {} was started for {:?}; restart it with the same types or use a new jobName",
                        params.job_name, previous.entity_types
                    )));
                }
                previous.restart();
                info!(
                    job = %params.job_name,
                    execution_id = %previous.execution_id,
                    restarts = previous.restart_count,
                    "Restarting job"
                );
                previous
            }
            Some(previous) => {
                info!(
                    job = %params.job_name,
                    previous_status = %previous.status,
                    "Previous execution finished, starting fresh"
                );
                self.checkpoint_store.clear_job(&params.job_name)?;
                JobExecution::new(&params.job_name, entity_types)
            }
            None => JobExecution::new(&params.job_name, entity_types),
        };
        job.status = JobStatus::Running;
        self.checkpoint_store.save_job(&job)?;
        Ok(job)
    }

    fn execute(
        &self,
        params: &JobParameters,
        scope: &IndexingScope,
        source: &dyn RecordSource,
        checkpoints: &CheckpointManager,
        job: &mut JobExecution,
    ) -> Result<PartitionPlan, MassIndexError> {
        let ctx = LoadContext::from_params(params);

        if params.purge_all_on_start && !job.purge_done {
            for entity_type in scope.entity_types() {
                self.sink.purge(entity_type, ctx.tenant())?;
            }
            job.purge_done = true;
            self.checkpoint_store.save_job(job)?;
            self.monitor.on_event(&ProgressEvent::Purged {
                entity_types: scope.entity_types().cloned().collect(),
            });
        }

        if params.purge_all_on_start && params.optimize_after_purge && !job.pre_optimize_done {
            self.optimize(OptimizePhase::AfterPurge);
            job.pre_optimize_done = true;
            self.checkpoint_store.save_job(job)?;
        }

        let plan = if job.partitions_planned {
            self.checkpoint_store
                .load_plan(&job.job_name)?
                .ok_or_else(|| {
                    MassIndexError::CheckpointPersist(format!(
                        "partition plan of {} is missing",
                        job.job_name
                    ))
                })?
        } else {
            let plan = PartitionPlanner::new(source, &ctx, params).plan(scope)?;
            let initial: Vec<CheckpointRecord> = plan
                .partitions
                .iter()
                .map(|p| CheckpointRecord::new(p.id.clone()))
                .collect();
            job.partitions_planned = true;
            self.checkpoint_store.save_plan(job, &plan, &initial)?;
            plan
        };

        let mut work: Vec<TypeWork> = Vec::new();
        let mut pending = 0;
        for partition in &plan.partitions {
            if checkpoints.resume_point(&partition.id)? == ResumePoint::Skip {
                continue;
            }
            pending += 1;
            match work.last_mut() {
                Some(last) if &last.entity_type == partition.entity_type() => {
                    last.partitions.push(partition.clone())
                }
                _ => work.push(TypeWork {
                    entity_type: partition.entity_type().clone(),
                    partitions: vec![partition.clone()],
                }),
            }
        }
        self.monitor.on_event(&ProgressEvent::PlanReady {
            partitions: plan.len(),
            pending,
        });

        let budget = ExecutionBudget::plan(
            params.types_to_index_in_parallel,
            params.threads_to_load_objects,
            params.max_threads.unwrap_or(pending),
        );
        let default_gate;
        let flush_gate = match &self.flush_gate {
            Some(gate) => gate,
            None => {
                default_gate = FlushGate::new(params.flush_retries);
                &default_gate
            }
        };
        let processor = ChunkProcessor {
            source,
            scope,
            converters: &self.converters,
            sink: self.sink.as_ref(),
            flush_gate,
            checkpoints,
            monitor: self.monitor.as_ref(),
            stop: &self.stop,
            ctx: &ctx,
            settings: ChunkSettings::from_params(params).with_skip_policy(self.skip_policy),
        };
        let outcomes = Scheduler::new(budget, &processor, &self.stop).run(work)?;

        let completed = plan.partitions.iter().all(|p| {
            outcomes
                .iter()
                .find(|o| o.partition == p.id)
                .map(|o| o.status == PartitionStatus::Completed)
                .unwrap_or_else(|| {
                    matches!(checkpoints.resume_point(&p.id), Ok(ResumePoint::Skip))
                })
        });
        let status = if completed {
            JobStatus::Completed
        } else if self.stop.is_stopped() {
            JobStatus::Stopped
        } else {
            JobStatus::Failed
        };

        if status == JobStatus::Completed && params.optimize_on_finish {
            self.optimize(OptimizePhase::OnFinish);
        }

        job.finish(status);
        self.checkpoint_store.save_job(job)?;
        info!(job = %job.job_name, status = %status, "Mass indexing job ended");
        Ok(plan)
    }

    /// Optimize failures are logged and do not fail the job.
    fn optimize(&self, phase: OptimizePhase) {
        match self.sink.optimize() {
            Ok(()) => self.monitor.on_event(&ProgressEvent::Optimized { phase }),
            Err(e) => warn!(phase = ?phase, error = %e, "Index optimize failed"),
        }
    }
}
