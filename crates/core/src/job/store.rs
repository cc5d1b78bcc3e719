//! Job storage trait and request types.

use thiserror::Error;

use super::types::{Job, JobSnapshot, JobStatus, Unit, UnitStatus};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Unit not found: {0}")]
    UnitNotFound(i64),

    /// The requested transition is not allowed from the current status.
    #[error("Cannot {operation} {entity}: current status is {current}")]
    InvalidState {
        entity: String,
        current: String,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl JobStoreError {
    pub(crate) fn invalid_job_state(job_id: &str, current: JobStatus, operation: &str) -> Self {
        Self::InvalidState {
            entity: format!("job {}", job_id),
            current: current.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl From<rusqlite::Error> for JobStoreError {
    fn from(e: rusqlite::Error) -> Self {
        JobStoreError::Database(e.to_string())
    }
}

/// A unit to be created as part of a decomposition commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUnit {
    pub name: String,
    pub status: UnitStatus,
    pub error_message: Option<String>,
}

impl NewUnit {
    /// A convertible entry, waiting for dispatch.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: UnitStatus::Pending,
            error_message: None,
        }
    }

    /// An entry rejected before execution.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: UnitStatus::Failed,
            error_message: Some(reason.into()),
        }
    }
}

/// Outcome of committing a job's decomposition.
#[derive(Debug, Clone)]
pub struct DecompositionCommit {
    /// The job after the commit: `IN_PROGRESS`, or `FAILED` when nothing is
    /// left to convert.
    pub job: Job,
    pub units: Vec<Unit>,
}

impl DecompositionCommit {
    pub fn pending_unit_ids(&self) -> Vec<i64> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .map(|u| u.id)
            .collect()
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// Every mutating operation is atomic. Status changes are conditional on
/// the current status so that concurrent or duplicate callers cannot move a
/// job or unit backwards or finish it twice.
pub trait JobStore: Send + Sync {
    /// Create a new `PENDING` job.
    fn create_job(&self) -> Result<Job, JobStoreError>;

    fn get_job(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// Read a job and all its units as one consistent snapshot.
    fn get_snapshot(&self, id: &str) -> Result<Option<JobSnapshot>, JobStoreError>;

    /// List jobs matching the filter, newest first.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    fn count_jobs(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Insert every unit of a `PENDING` job and move the job forward in the
    /// same transaction: to `IN_PROGRESS` when at least one unit is pending,
    /// otherwise straight to `FAILED` with `finished_at` set.
    fn commit_decomposition(
        &self,
        job_id: &str,
        units: Vec<NewUnit>,
    ) -> Result<DecompositionCommit, JobStoreError>;

    /// Fail a `PENDING` job whose batch could not be decomposed.
    fn fail_job(&self, job_id: &str) -> Result<Job, JobStoreError>;

    fn get_unit(&self, unit_id: i64) -> Result<Option<Unit>, JobStoreError>;

    fn list_units(&self, job_id: &str) -> Result<Vec<Unit>, JobStoreError>;

    /// Move a `PENDING` unit to a terminal status.
    ///
    /// Returns `true` if this call performed the transition and `false` if
    /// the unit had already been finished by someone else.
    fn record_unit_outcome(
        &self,
        unit_id: i64,
        status: UnitStatus,
        error_message: Option<&str>,
    ) -> Result<bool, JobStoreError>;

    /// Move an `IN_PROGRESS` job to a terminal status, stamping
    /// `finished_at`. The result location is kept only for `COMPLETED`.
    ///
    /// Returns `true` if this call performed the transition.
    fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result_location: Option<&str>,
    ) -> Result<bool, JobStoreError>;

    /// Delete a terminal job and all of its units in one transaction.
    /// Returns the deleted snapshot.
    fn delete_job(&self, job_id: &str) -> Result<JobSnapshot, JobStoreError>;
}
