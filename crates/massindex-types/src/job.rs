//! Job execution state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::entity::EntityType;

/// Overall status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Running,
    /// Stopped by an external signal; a restart resumes it
    Stopped,
    Completed,
    Failed,
    Abandoned,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Abandoned
        )
    }

    /// Whether a later run with the same job name picks this execution up.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, JobStatus::Completed | JobStatus::Abandoned)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Starting => "STARTING",
            JobStatus::Running => "RUNNING",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Persisted state of one job instance across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Stable across restarts of the same job instance
    pub execution_id: String,
    pub job_name: String,
    pub entity_types: Vec<EntityType>,
    pub status: JobStatus,
    /// Purge step finished (never repeated on restart)
    pub purge_done: bool,
    /// Optimize-after-purge step finished
    pub pre_optimize_done: bool,
    /// Partition plan persisted
    pub partitions_planned: bool,
    pub restart_count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn new(job_name: impl Into<String>, entity_types: Vec<EntityType>) -> Self {
        Self {
            execution_id: Ulid::new().to_string(),
            job_name: job_name.into(),
            entity_types,
            status: JobStatus::Starting,
            purge_done: false,
            pre_optimize_done: false,
            partitions_planned: false,
            restart_count: 0,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Reopen a restartable execution.
    pub fn restart(&mut self) {
        self.restart_count += 1;
        self.status = JobStatus::Starting;
        self.ended_at = None;
    }

    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
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
