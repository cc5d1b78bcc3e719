//! Batch orchestrator implementation.
//!
//! Wires decomposition, dispatch, unit execution, the completion barrier
//! and aggregation together, and exposes the job-level operations used by
//! the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::converter::Converter;
use crate::job::{Job, JobFilter, JobSnapshot, JobStatus, JobStore, JobStoreError};
use crate::workspace::Workspace;

use super::aggregator::ResultAggregator;
use super::barrier::CompletionBarrier;
use super::config::OrchestratorConfig;
use super::decomposer::ArchiveDecomposer;
use super::dispatcher::{Dispatcher, WorkerPool};
use super::executor::UnitExecutor;
use super::types::{OrchestratorError, OrchestratorStatus, PoolStats, RecoveryReport};

/// Drives batch jobs from upload to result archive.
pub struct BatchOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    workspace: Workspace,
    decomposer: Arc<ArchiveDecomposer>,
    dispatcher: Arc<Dispatcher>,
    aggregator: Arc<ResultAggregator>,
    executor: Arc<UnitExecutor>,
    barrier: Arc<CompletionBarrier>,
    pool: Arc<WorkerPool>,
    stats: Arc<PoolStats>,
}

impl BatchOrchestrator {
    /// Create a new orchestrator. Call [`start`](Self::start) to begin
    /// executing units.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        converter: Arc<dyn Converter>,
        workspace: Workspace,
        unit_timeout: Duration,
    ) -> Self {
        let stats = Arc::new(PoolStats::default());
        let barrier = Arc::new(CompletionBarrier::new());
        let pool = Arc::new(WorkerPool::new(config.max_parallel_units, Arc::clone(&stats)));

        let decomposer = Arc::new(ArchiveDecomposer::new(
            Arc::clone(&store),
            workspace.clone(),
            &config,
        ));
        let aggregator = Arc::new(ResultAggregator::new(
            Arc::clone(&store),
            workspace.clone(),
            converter.target_format(),
        ));
        let executor = Arc::new(UnitExecutor::new(
            Arc::clone(&store),
            converter,
            workspace.clone(),
            Arc::clone(&barrier),
            Arc::clone(&aggregator),
            unit_timeout,
            Arc::clone(&stats),
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&barrier), pool.clone()));

        Self {
            config,
            store,
            workspace,
            decomposer,
            dispatcher,
            aggregator,
            executor,
            barrier,
            pool,
            stats,
        }
    }

    /// Start the worker pool and, if configured, resume interrupted jobs.
    pub async fn start(&self) {
        info!(
            max_parallel_units = self.pool.max_parallel(),
            "Starting batch orchestrator"
        );
        self.pool.start(Arc::clone(&self.executor));

        if self.config.recover_on_start {
            match self.recover().await {
                Ok(report) => info!(?report, "Recovery finished"),
                Err(e) => error!(error = %e, "Recovery failed"),
            }
        }
    }

    /// Stop taking units off the queue. Units already running finish.
    pub fn stop(&self) {
        info!("Stopping batch orchestrator");
        self.pool.stop();
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.stats
            .to_status(self.pool.is_running(), self.pool.max_parallel())
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Accept a batch archive.
    ///
    /// Stores the upload, creates the `PENDING` job and returns it at once;
    /// decomposition and dispatch continue in the background.
    pub async fn submit_job(&self, file_name: &str, bytes: &[u8]) -> Result<Job, OrchestratorError> {
        let job = self.store.create_job()?;

        if let Err(e) = self.workspace.store_upload(&job.id, bytes).await {
            error!(job_id = %job.id, error = %e, "Failed to store upload");
            self.store.fail_job(&job.id)?;
            return Err(e.into());
        }

        info!(job_id = %job.id, file_name = %file_name, size = bytes.len(), "Job submitted");

        let decomposer = Arc::clone(&self.decomposer);
        let dispatcher = Arc::clone(&self.dispatcher);
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::run_incoming(&decomposer, &dispatcher, &job_id).await {
                error!(job_id = %job_id, error = %e, "Failed to process incoming job");
            }
        });

        Ok(job)
    }

    /// Decompose a `PENDING` job and dispatch its convertible units.
    pub async fn process_incoming(&self, job_id: &str) -> Result<JobSnapshot, OrchestratorError> {
        Self::run_incoming(&self.decomposer, &self.dispatcher, job_id).await?;
        self.get_job(job_id)
    }

    async fn run_incoming(
        decomposer: &ArchiveDecomposer,
        dispatcher: &Dispatcher,
        job_id: &str,
    ) -> Result<(), OrchestratorError> {
        let commit = decomposer.decompose(job_id).await?;
        let pending = commit.pending_unit_ids();
        if !pending.is_empty() {
            dispatcher.dispatch(job_id, &pending).await?;
        }
        Ok(())
    }

    /// A consistent snapshot of the job and all its units.
    pub fn get_job(&self, job_id: &str) -> Result<JobSnapshot, OrchestratorError> {
        self.store
            .get_snapshot(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.store.list_jobs(filter)?)
    }

    pub fn count_jobs(&self, filter: &JobFilter) -> Result<i64, OrchestratorError> {
        Ok(self.store.count_jobs(filter)?)
    }

    /// Path of the job's result archive.
    ///
    /// Fails with `NotReady` unless the job is `COMPLETED` with a result,
    /// and with `ResultMissing` if the file is gone from storage.
    pub async fn result_archive(&self, job_id: &str) -> Result<std::path::PathBuf, OrchestratorError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;

        let location = match (job.status, job.result_location.as_deref()) {
            (JobStatus::Completed, Some(location)) => location,
            (status, _) => {
                return Err(OrchestratorError::NotReady {
                    job_id: job_id.to_string(),
                    status,
                })
            }
        };

        let path = self.workspace.resolve(location);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(job_id = %job_id, path = %path.display(), "Result archive missing");
            return Err(OrchestratorError::ResultMissing(job_id.to_string()));
        }
        Ok(path)
    }

    /// Delete a finished job, its units and its files.
    pub async fn delete_job(&self, job_id: &str) -> Result<JobSnapshot, OrchestratorError> {
        let snapshot = self.store.delete_job(job_id).map_err(|e| match e {
            JobStoreError::NotFound(id) => OrchestratorError::NotFound(id),
            JobStoreError::InvalidState { .. } => {
                let status = self
                    .store
                    .get_job(job_id)
                    .ok()
                    .flatten()
                    .map(|j| j.status)
                    .unwrap_or(JobStatus::InProgress);
                OrchestratorError::Conflict {
                    job_id: job_id.to_string(),
                    status,
                    operation: "deleted".to_string(),
                }
            }
            other => OrchestratorError::Store(other),
        })?;

        if let Err(e) = self.workspace.remove_job(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to remove job files");
        }
        info!(job_id = %job_id, "Job deleted");
        Ok(snapshot)
    }

    /// Resume jobs left unfinished by a previous run.
    ///
    /// `PENDING` jobs have no units (decomposition commits atomically), so
    /// they are decomposed again if their upload survived and failed
    /// otherwise. `IN_PROGRESS` jobs get their remaining `PENDING` units
    /// dispatched, or are aggregated right away when none remain.
    ///
    /// A job that cannot be recovered is logged and counted in
    /// [`RecoveryReport::errors`]; the remaining jobs are still recovered.
    pub async fn recover(&self) -> Result<RecoveryReport, OrchestratorError> {
        let mut report = RecoveryReport::default();

        for job in self.jobs_with_status(JobStatus::Pending)? {
            if let Err(e) = self.recover_pending(&job.id, &mut report).await {
                error!(job_id = %job.id, error = %e, "Failed to recover pending job");
                report.errors += 1;
            }
        }

        for job in self.jobs_with_status(JobStatus::InProgress)? {
            if let Err(e) = self.recover_in_progress(&job.id, &mut report).await {
                error!(job_id = %job.id, error = %e, "Failed to recover in-progress job");
                report.errors += 1;
            }
        }

        Ok(report)
    }

    async fn recover_pending(
        &self,
        job_id: &str,
        report: &mut RecoveryReport,
    ) -> Result<(), OrchestratorError> {
        let upload = self.workspace.upload_path(job_id);
        if tokio::fs::try_exists(&upload).await.unwrap_or(false) {
            info!(job_id = %job_id, "Recovering pending job");
            Self::run_incoming(&self.decomposer, &self.dispatcher, job_id).await?;
            report.decomposed_jobs += 1;
        } else {
            warn!(job_id = %job_id, "Upload missing for pending job, failing it");
            self.store.fail_job(job_id)?;
            report.failed_jobs += 1;
        }
        Ok(())
    }

    async fn recover_in_progress(
        &self,
        job_id: &str,
        report: &mut RecoveryReport,
    ) -> Result<(), OrchestratorError> {
        if self.barrier.is_registered(job_id).await {
            return Ok(());
        }

        let pending = self
            .store
            .get_snapshot(job_id)?
            .map(|s| s.pending_unit_ids())
            .unwrap_or_default();

        if pending.is_empty() {
            info!(job_id = %job_id, "Recovering job with all units finished");
            self.aggregator.aggregate(job_id).await?;
            report.aggregated_jobs += 1;
        } else {
            info!(job_id = %job_id, units = pending.len(), "Re-dispatching unfinished units");
            report.redispatched_units += self.dispatcher.dispatch(job_id, &pending).await?;
        }
        Ok(())
    }

    fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>, OrchestratorError> {
        let filter = JobFilter::new().with_status(status);
        let total = self.store.count_jobs(&filter)?;
        Ok(self.store.list_jobs(&filter.with_limit(total.max(1)))?)
    }
}
