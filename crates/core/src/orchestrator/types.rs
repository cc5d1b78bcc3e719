//! Types for the batch orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::job::{JobStatus, JobStoreError};

use super::dispatcher::DispatchError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The job has no result archive yet.
    #[error("job {job_id} is not ready: status is {status}")]
    NotReady { job_id: String, status: JobStatus },

    /// The job is complete but its archive is gone from storage.
    #[error("result archive missing for job {0}")]
    ResultMissing(String),

    /// The operation is not allowed in the job's current status.
    #[error("job {job_id} cannot be {operation} while {status}")]
    Conflict {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the worker pool is consuming the queue.
    pub running: bool,
    /// Units whose converter is running right now.
    pub active_units: usize,
    /// Units waiting for a worker.
    pub queued_units: usize,
    pub max_parallel_units: usize,
    /// Units executed since startup.
    pub units_processed: u64,
    /// Of which ended `FAILED`.
    pub units_failed: u64,
}

/// Summary of a recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// `PENDING` jobs decomposed again.
    pub decomposed_jobs: usize,
    /// `PENDING` jobs failed because their upload was gone.
    pub failed_jobs: usize,
    /// Units put back on the queue for `IN_PROGRESS` jobs.
    pub redispatched_units: usize,
    /// `IN_PROGRESS` jobs with nothing left to run, aggregated directly.
    pub aggregated_jobs: usize,
    /// Jobs that could not be recovered.
    pub errors: usize,
}

/// Tracks statistics for the worker pool.
#[derive(Default)]
pub(crate) struct PoolStats {
    pub(crate) active: AtomicU64,
    pub(crate) queued: AtomicU64,
    pub(crate) total_processed: AtomicU64,
    pub(crate) total_failed: AtomicU64,
}

impl PoolStats {
    pub(crate) fn to_status(&self, running: bool, max_parallel_units: usize) -> OrchestratorStatus {
        OrchestratorStatus {
            running,
            active_units: self.active.load(Ordering::Relaxed) as usize,
            queued_units: self.queued.load(Ordering::Relaxed) as usize,
            max_parallel_units,
            units_processed: self.total_processed.load(Ordering::Relaxed),
            units_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.active_units, 0);
        assert_eq!(status.units_processed, 0);
    }

    #[test]
    fn test_pool_stats_to_status() {
        let stats = PoolStats::default();
        stats.queued.fetch_add(3, Ordering::Relaxed);
        stats.total_processed.fetch_add(5, Ordering::Relaxed);
        stats.total_failed.fetch_add(2, Ordering::Relaxed);

        let status = stats.to_status(true, 4);
        assert!(status.running);
        assert_eq!(status.queued_units, 3);
        assert_eq!(status.max_parallel_units, 4);
        assert_eq!(status.units_processed, 5);
        assert_eq!(status.units_failed, 2);
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::NotFound("job-456".to_string());
        assert_eq!(err.to_string(), "job not found: job-456");

        let err = OrchestratorError::NotReady {
            job_id: "job-1".to_string(),
            status: JobStatus::InProgress,
        };
        assert_eq!(err.to_string(), "job job-1 is not ready: status is IN_PROGRESS");

        let err = OrchestratorError::Conflict {
            job_id: "job-1".to_string(),
            status: JobStatus::Pending,
            operation: "deleted".to_string(),
        };
        assert_eq!(err.to_string(), "job job-1 cannot be deleted while PENDING");
    }
}
