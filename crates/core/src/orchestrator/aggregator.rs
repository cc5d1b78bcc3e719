//! Result aggregation: packages the outputs of a finished job.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::archive::{build_archive, ArchiveFile};
use crate::converter::expected_output;
use crate::job::{JobStatus, JobStore, UnitStatus};
use crate::metrics;
use crate::workspace::Workspace;

use super::types::OrchestratorError;

/// What an aggregation run decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationReport {
    pub status: JobStatus,
    /// Outputs written into the result archive.
    pub archived: usize,
    /// `COMPLETED` units whose output file was not found.
    pub missing: usize,
    /// Whether this run moved the job to its terminal status. `false` means
    /// the job had already been finished and nothing was changed.
    pub applied: bool,
}

/// Builds the result archive and moves the job to its final status.
pub struct ResultAggregator {
    store: Arc<dyn JobStore>,
    workspace: Workspace,
    target_format: String,
}

impl ResultAggregator {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        workspace: Workspace,
        target_format: impl Into<String>,
    ) -> Self {
        Self {
            store,
            workspace,
            target_format: target_format.into(),
        }
    }

    /// Aggregate a job whose units are all terminal.
    ///
    /// Unit statuses are read fresh from the store. The job ends `COMPLETED`
    /// when at least one output made it into the archive and `FAILED`
    /// otherwise, including when the archive cannot be written. A
    /// `COMPLETED` unit whose output has disappeared is left as recorded
    /// but contributes nothing.
    pub async fn aggregate(&self, job_id: &str) -> Result<AggregationReport, OrchestratorError> {
        let started = Instant::now();

        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::InProgress {
            warn!(job_id = %job_id, status = %job.status, "Job already finished, not aggregating again");
            return Ok(AggregationReport {
                status: job.status,
                archived: 0,
                missing: 0,
                applied: false,
            });
        }

        let units = self.store.list_units(job_id)?;
        let mut files = Vec::new();
        let mut names = HashSet::new();
        let mut missing = 0;

        for unit in units.iter().filter(|u| u.status == UnitStatus::Completed) {
            let output = expected_output(
                Path::new(&unit.name),
                &self.workspace.unit_output_dir(job_id, unit.id),
                &self.target_format,
            );
            if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
                warn!(
                    job_id = %job_id,
                    unit_id = unit.id,
                    output = %output.display(),
                    "Completed unit has no output, leaving it out of the archive"
                );
                missing += 1;
                continue;
            }

            let name = output_entry_name(&unit.name, &self.target_format);
            if !names.insert(name.clone()) {
                warn!(job_id = %job_id, unit_id = unit.id, name = %name, "Duplicate archive name, skipping");
                continue;
            }
            files.push(ArchiveFile {
                source: output,
                name,
            });
        }

        let archived = files.len();
        let (status, location) = if files.is_empty() {
            (JobStatus::Failed, None)
        } else {
            match build_archive(files, &self.workspace.result_path(job_id)).await {
                Ok(count) => {
                    info!(job_id = %job_id, files = count, "Result archive written");
                    (
                        JobStatus::Completed,
                        Some(self.workspace.result_location(job_id)),
                    )
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to build result archive");
                    (JobStatus::Failed, None)
                }
            }
        };

        let applied = self.store.finish_job(job_id, status, location.as_deref())?;
        if applied {
            let status_label = status.as_str().to_ascii_lowercase();
            metrics::JOBS_FINISHED
                .with_label_values(&[status_label.as_str()])
                .inc();
            info!(job_id = %job_id, status = %status, archived, missing, "Job finished");
        } else {
            warn!(job_id = %job_id, "Job was finished concurrently, result not applied");
        }

        metrics::AGGREGATION_DURATION.observe(started.elapsed().as_secs_f64());

        Ok(AggregationReport {
            status,
            archived: if status == JobStatus::Completed { archived } else { 0 },
            missing,
            applied,
        })
    }
}

/// Name of a unit's output inside the result archive: the entry name with
/// its extension replaced, folders kept (`reports/a.docx` -> `reports/a.pdf`).
pub(crate) fn output_entry_name(entry: &str, format: &str) -> String {
    let (dir, base) = match entry.rfind('/') {
        Some(i) => entry.split_at(i + 1),
        None => ("", entry),
    };
    let stem = match base.rfind('.') {
        Some(i) if i > 0 => &base[..i],
        _ => base,
    };
    format!("{}{}.{}", dir, stem, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{NewUnit, SqliteJobStore};
    use std::io::Read;

    #[test]
    fn test_output_entry_name() {
        assert_eq!(output_entry_name("a.docx", "pdf"), "a.pdf");
        assert_eq!(output_entry_name("reports/q1.final.docx", "pdf"), "reports/q1.final.pdf");
        assert_eq!(output_entry_name("README", "pdf"), "README.pdf");
        assert_eq!(output_entry_name("dir.v2/notes", "pdf"), "dir.v2/notes.pdf");
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SqliteJobStore>,
        workspace: Workspace,
        aggregator: ResultAggregator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let workspace = Workspace::new(dir.path().join("jobs"), dir.path().join("scratch"));
        let aggregator = ResultAggregator::new(store.clone(), workspace.clone(), "pdf");
        Fixture {
            _dir: dir,
            store,
            workspace,
            aggregator,
        }
    }

    fn write_output(ws: &Workspace, job_id: &str, unit_id: i64, name: &str) {
        let dir = ws.unit_output_dir(job_id, unit_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), format!("%PDF {}", name)).unwrap();
    }

    #[tokio::test]
    async fn test_partial_success_completes_job() {
        let f = fixture();
        let job = f.store.create_job().unwrap();
        let commit = f
            .store
            .commit_decomposition(
                &job.id,
                vec![NewUnit::pending("a.docx"), NewUnit::pending("b.docx")],
            )
            .unwrap();
        let ids = commit.pending_unit_ids();
        f.store
            .record_unit_outcome(ids[0], UnitStatus::Completed, None)
            .unwrap();
        f.store
            .record_unit_outcome(ids[1], UnitStatus::Failed, Some("boom"))
            .unwrap();
        write_output(&f.workspace, &job.id, ids[0], "a.pdf");

        let report = f.aggregator.aggregate(&job.id).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.archived, 1);
        assert!(report.applied);

        let job = f.store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_location, Some(f.workspace.result_location(&job.id)));
        assert!(job.finished_at.is_some());

        let file = std::fs::File::open(f.workspace.result_path(&job.id)).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len(), 1);
        let mut content = String::new();
        zip.by_name("a.pdf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "%PDF a.pdf");
    }

    #[tokio::test]
    async fn test_missing_output_counts_as_failure() {
        let f = fixture();
        let job = f.store.create_job().unwrap();
        let commit = f
            .store
            .commit_decomposition(&job.id, vec![NewUnit::pending("a.docx")])
            .unwrap();
        let id = commit.pending_unit_ids()[0];
        f.store
            .record_unit_outcome(id, UnitStatus::Completed, None)
            .unwrap();

        let report = f.aggregator.aggregate(&job.id).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.missing, 1);

        let snapshot = f.store.get_snapshot(&job.id).unwrap().unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Failed);
        assert!(snapshot.job.result_location.is_none());
        // The unit keeps its recorded status.
        assert_eq!(snapshot.units[0].status, UnitStatus::Completed);
        assert!(!f.workspace.result_path(&job.id).exists());
    }

    #[tokio::test]
    async fn test_second_aggregation_changes_nothing() {
        let f = fixture();
        let job = f.store.create_job().unwrap();
        let commit = f
            .store
            .commit_decomposition(&job.id, vec![NewUnit::pending("a.docx")])
            .unwrap();
        let id = commit.pending_unit_ids()[0];
        f.store
            .record_unit_outcome(id, UnitStatus::Failed, Some("x"))
            .unwrap();

        let first = f.aggregator.aggregate(&job.id).await.unwrap();
        assert!(first.applied);
        let finished = f.store.get_job(&job.id).unwrap().unwrap();

        let second = f.aggregator.aggregate(&job.id).await.unwrap();
        assert!(!second.applied);
        assert_eq!(f.store.get_job(&job.id).unwrap().unwrap(), finished);
    }

    #[tokio::test]
    async fn test_duplicate_output_names_are_skipped() {
        let f = fixture();
        let job = f.store.create_job().unwrap();
        let commit = f
            .store
            .commit_decomposition(
                &job.id,
                vec![NewUnit::pending("a.docx"), NewUnit::pending("a.DOCX")],
            )
            .unwrap();
        for id in commit.pending_unit_ids() {
            f.store
                .record_unit_outcome(id, UnitStatus::Completed, None)
                .unwrap();
            write_output(&f.workspace, &job.id, id, "a.pdf");
        }

        let report = f.aggregator.aggregate(&job.id).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.archived, 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let f = fixture();
        let result = f.aggregator.aggregate("missing").await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }
}
