//! Unit executor: runs one unit through the converter and records the
//! outcome.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::converter::{ConversionJob, ConversionResult, Converter, ConverterError};
use crate::job::{
    JobStore, JobStoreError, Unit, UnitStatus, INVALID_DOCUMENT_MESSAGE, TIMEOUT_MESSAGE,
    UNRECORDED_OUTCOME_MESSAGE,
};
use crate::metrics;
use crate::workspace::Workspace;

use super::aggregator::ResultAggregator;
use super::barrier::{BarrierOutcome, CompletionBarrier};
use super::types::PoolStats;

/// Attempts at saving one outcome before falling back.
const RECORD_ATTEMPTS: u32 = 3;

const RECORD_RETRY_DELAY: Duration = Duration::from_millis(50);

/// What [`UnitExecutor::execute`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitExecution {
    /// The unit was unknown, belonged to another job, already had an
    /// outcome, or was being run by another delivery. The converter did not
    /// run and the barrier was not told.
    Skipped,
    /// The outcome was persisted and reported to the barrier.
    Recorded {
        status: UnitStatus,
        barrier: BarrierOutcome,
    },
    /// Neither the outcome nor the fallback failure could be persisted.
    /// The unit is still `PENDING` and is left to recovery.
    Unrecorded { status: UnitStatus },
}

/// Map a converter result to the unit's terminal status and error message.
pub fn unit_outcome(
    result: &Result<ConversionResult, ConverterError>,
) -> (UnitStatus, Option<String>) {
    match result {
        Ok(_) => (UnitStatus::Completed, None),
        Err(e) if e.is_timeout() => (UnitStatus::Failed, Some(TIMEOUT_MESSAGE.to_string())),
        Err(e) if e.is_document_rejected() => {
            (UnitStatus::Failed, Some(INVALID_DOCUMENT_MESSAGE.to_string()))
        }
        Err(e) => (UnitStatus::Failed, Some(e.to_string())),
    }
}

/// Executes single units.
pub struct UnitExecutor {
    store: Arc<dyn JobStore>,
    converter: Arc<dyn Converter>,
    workspace: Workspace,
    barrier: Arc<CompletionBarrier>,
    aggregator: Arc<ResultAggregator>,
    unit_timeout: Duration,
    stats: Arc<PoolStats>,
    in_flight: Mutex<HashSet<i64>>,
}

/// Exclusive right to run one unit in this process.
struct UnitClaim<'a> {
    in_flight: &'a Mutex<HashSet<i64>>,
    unit_id: i64,
}

impl Drop for UnitClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.unit_id);
    }
}

impl UnitExecutor {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        converter: Arc<dyn Converter>,
        workspace: Workspace,
        barrier: Arc<CompletionBarrier>,
        aggregator: Arc<ResultAggregator>,
        unit_timeout: Duration,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            store,
            converter,
            workspace,
            barrier,
            aggregator,
            unit_timeout,
            stats,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, unit_id: i64) -> Option<UnitClaim<'_>> {
        let claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit_id);
        claimed.then(|| UnitClaim {
            in_flight: &self.in_flight,
            unit_id,
        })
    }

    /// Run one unit to a terminal outcome.
    ///
    /// The outcome is persisted before the barrier hears about it. A unit
    /// that already has an outcome, or is already running here, is left
    /// alone, so duplicate deliveries neither rerun the converter nor count
    /// twice. When this unit completes the job, aggregation runs here before
    /// returning.
    ///
    /// Saving the outcome is retried. If it still cannot be saved the unit
    /// is recorded as `FAILED` instead, so the barrier is still told.
    pub async fn execute(&self, job_id: &str, unit_id: i64) -> UnitExecution {
        let Some(_claim) = self.claim(unit_id) else {
            debug!(job_id = %job_id, unit_id, "Unit already running, skipping");
            return UnitExecution::Skipped;
        };

        let unit = match self.store.get_unit(unit_id) {
            Ok(Some(unit)) if unit.job_id == job_id => unit,
            Ok(Some(unit)) => {
                warn!(job_id = %job_id, unit_id, owner = %unit.job_id, "Unit belongs to another job");
                return UnitExecution::Skipped;
            }
            Ok(None) => {
                warn!(job_id = %job_id, unit_id, "Unit not found");
                return UnitExecution::Skipped;
            }
            Err(e) => {
                error!(job_id = %job_id, unit_id, error = %e, "Failed to load unit");
                return UnitExecution::Skipped;
            }
        };

        if unit.status.is_terminal() {
            debug!(job_id = %job_id, unit_id, status = %unit.status, "Unit already finished, skipping");
            return UnitExecution::Skipped;
        }

        let started = Instant::now();
        let result = self.run_converter(job_id, &unit).await;
        let (status, message) = unit_outcome(&result);

        let result_label = match &result {
            Ok(_) => "success",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "failure",
        };
        metrics::UNIT_DURATION
            .with_label_values(&[result_label])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(output) => debug!(
                job_id = %job_id,
                unit_id,
                output = %output.output_path.display(),
                size = output.output_size_bytes,
                "Unit converted"
            ),
            Err(e) => warn!(job_id = %job_id, unit_id, name = %unit.name, error = %e, "Unit failed"),
        }

        let recorded = self.persist_outcome(job_id, unit_id, status, message.as_deref()).await;
        self.cleanup_scratch(job_id, unit_id).await;

        let status = match recorded {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!(job_id = %job_id, unit_id, "Unit outcome already recorded by another delivery");
                return UnitExecution::Skipped;
            }
            Err(e) => {
                error!(job_id = %job_id, unit_id, error = %e, "Failed to record unit outcome, leaving it to recovery");
                return UnitExecution::Unrecorded { status };
            }
        };

        self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
        if status == UnitStatus::Failed {
            self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        let status_label = status.as_str().to_ascii_lowercase();
        metrics::UNITS_TOTAL
            .with_label_values(&[status_label.as_str()])
            .inc();

        let barrier = self.barrier.notify(job_id, unit_id).await;
        if barrier.should_aggregate() {
            info!(job_id = %job_id, "All units finished, aggregating");
            if let Err(e) = self.aggregator.aggregate(job_id).await {
                error!(job_id = %job_id, error = %e, "Aggregation failed");
            }
            self.barrier.forget(job_id).await;
        }

        UnitExecution::Recorded { status, barrier }
    }

    /// Save the outcome, falling back to a plain failure when the outcome
    /// itself cannot be saved. Returns the status that was saved, or `None`
    /// when the unit already had one.
    async fn persist_outcome(
        &self,
        job_id: &str,
        unit_id: i64,
        status: UnitStatus,
        message: Option<&str>,
    ) -> Result<Option<UnitStatus>, JobStoreError> {
        match self.record_with_retry(job_id, unit_id, status, message).await {
            Ok(recorded) => Ok(recorded.then_some(status)),
            Err(e) => {
                error!(job_id = %job_id, unit_id, error = %e, "Failed to record unit outcome, marking unit failed");
                let recorded = self
                    .record_with_retry(
                        job_id,
                        unit_id,
                        UnitStatus::Failed,
                        Some(UNRECORDED_OUTCOME_MESSAGE),
                    )
                    .await?;
                if recorded {
                    return Ok(Some(UnitStatus::Failed));
                }
                // One of the failed attempts above landed after all.
                let stored = self.store.get_unit(unit_id)?.map(|u| u.status);
                Ok(stored.filter(|s| s.is_terminal()))
            }
        }
    }

    async fn record_with_retry(
        &self,
        job_id: &str,
        unit_id: i64,
        status: UnitStatus,
        message: Option<&str>,
    ) -> Result<bool, JobStoreError> {
        let mut attempt = 1;
        loop {
            match self.store.record_unit_outcome(unit_id, status, message) {
                // The unit is claimed, so after a failed attempt a lost
                // compare-and-set means that attempt did land.
                Ok(recorded) => return Ok(recorded || attempt > 1),
                Err(e) if attempt < RECORD_ATTEMPTS => {
                    warn!(job_id = %job_id, unit_id, attempt, error = %e, "Recording unit outcome failed, retrying");
                    tokio::time::sleep(RECORD_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_converter(
        &self,
        job_id: &str,
        unit: &Unit,
    ) -> Result<ConversionResult, ConverterError> {
        let profile_dir = self.workspace.prepare_scratch(job_id, unit.id).await?;

        let job = ConversionJob {
            job_id: job_id.to_string(),
            unit_id: unit.id,
            input_path: self.workspace.input_dir(job_id).join(&unit.name),
            output_dir: self.workspace.unit_output_dir(job_id, unit.id),
            profile_dir,
            timeout: self.unit_timeout,
        };

        self.converter.convert(job).await
    }

    async fn cleanup_scratch(&self, job_id: &str, unit_id: i64) {
        if let Err(e) = self.workspace.remove_scratch(job_id, unit_id).await {
            warn!(job_id = %job_id, unit_id, error = %e, "Failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{NewUnit, SqliteJobStore};
    use crate::testing::MockConverter;
    use std::path::PathBuf;

    struct ExecutorFixture {
        store: Arc<SqliteJobStore>,
        converter: Arc<MockConverter>,
        barrier: Arc<CompletionBarrier>,
        executor: UnitExecutor,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> ExecutorFixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let converter = Arc::new(MockConverter::new());
        let workspace = Workspace::new(dir.path().join("jobs"), dir.path().join("scratch"));
        let barrier = Arc::new(CompletionBarrier::new());
        let aggregator = Arc::new(ResultAggregator::new(
            store.clone(),
            workspace.clone(),
            "pdf",
        ));
        let executor = UnitExecutor::new(
            store.clone(),
            converter.clone(),
            workspace,
            Arc::clone(&barrier),
            aggregator,
            Duration::from_secs(5),
            Arc::new(PoolStats::default()),
        );
        ExecutorFixture {
            store,
            converter,
            barrier,
            executor,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_run_unit_once() {
        let f = fixture();
        let job = f.store.create_job().unwrap();
        let commit = f
            .store
            .commit_decomposition(&job.id, vec![NewUnit::pending("a.docx")])
            .unwrap();
        let unit_id = commit.pending_unit_ids()[0];
        f.barrier.register(&job.id, &[unit_id]).await.unwrap();
        f.converter.set_delay(Duration::from_millis(200)).await;

        let (first, second) = tokio::join!(
            f.executor.execute(&job.id, unit_id),
            f.executor.execute(&job.id, unit_id)
        );

        assert_eq!(f.converter.conversion_count().await, 1);
        let outcomes = [first, second];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, UnitExecution::Recorded { .. }))
                .count(),
            1
        );
        assert!(outcomes.contains(&UnitExecution::Skipped));

        // Once finished, a late delivery is skipped on the stored status.
        assert_eq!(f.executor.execute(&job.id, unit_id).await, UnitExecution::Skipped);
        assert_eq!(f.converter.conversion_count().await, 1);
    }

    fn ok_result() -> Result<ConversionResult, ConverterError> {
        Ok(ConversionResult {
            job_id: "job".to_string(),
            unit_id: 1,
            output_path: PathBuf::from("/out/a.pdf"),
            output_size_bytes: 10,
            duration_ms: 5,
        })
    }

    #[test]
    fn test_unit_outcome_success() {
        assert_eq!(unit_outcome(&ok_result()), (UnitStatus::Completed, None));
    }

    #[test]
    fn test_unit_outcome_non_zero_exit() {
        let result = Err(ConverterError::ConversionFailed {
            exit_code: Some(77),
            stderr: Some("Error: source file could not be loaded".to_string()),
        });
        assert_eq!(
            unit_outcome(&result),
            (UnitStatus::Failed, Some(INVALID_DOCUMENT_MESSAGE.to_string()))
        );
    }

    #[test]
    fn test_unit_outcome_missing_output() {
        let result = Err(ConverterError::OutputMissing {
            path: PathBuf::from("/out/a.pdf"),
        });
        assert_eq!(
            unit_outcome(&result).1.as_deref(),
            Some(INVALID_DOCUMENT_MESSAGE)
        );
    }

    #[test]
    fn test_unit_outcome_timeout() {
        let result = Err(ConverterError::Timeout {
            timeout: Duration::from_secs(120),
        });
        assert_eq!(
            unit_outcome(&result),
            (UnitStatus::Failed, Some(TIMEOUT_MESSAGE.to_string()))
        );
    }

    #[test]
    fn test_unit_outcome_launch_error_uses_cause() {
        let result = Err(ConverterError::BinaryNotFound {
            path: PathBuf::from("/usr/bin/soffice"),
        });
        assert_eq!(
            unit_outcome(&result).1.as_deref(),
            Some("Converter not found at path: /usr/bin/soffice")
        );
    }
}
