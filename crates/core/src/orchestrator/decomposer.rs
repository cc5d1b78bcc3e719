//! Archive decomposition: one unit per archive entry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::{extract_archive, EntryKind, ExtractedEntry};
use crate::job::{DecompositionCommit, JobStatus, JobStore, NewUnit, INVALID_DOCUMENT_MESSAGE};
use crate::metrics;
use crate::workspace::Workspace;

use super::config::OrchestratorConfig;
use super::types::OrchestratorError;

/// Extracts a job's uploaded archive and commits its units.
pub struct ArchiveDecomposer {
    store: Arc<dyn JobStore>,
    workspace: Workspace,
    accepted_extensions: Vec<String>,
    ignored_prefixes: Vec<String>,
}

impl ArchiveDecomposer {
    pub fn new(store: Arc<dyn JobStore>, workspace: Workspace, config: &OrchestratorConfig) -> Self {
        Self {
            store,
            workspace,
            accepted_extensions: config
                .accepted_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignored_prefixes: config.ignored_prefixes.clone(),
        }
    }

    /// Decide whether an entry becomes a `PENDING` unit.
    ///
    /// Convertible entries are non-empty regular files with an accepted
    /// extension whose base name does not start with an ignored prefix.
    pub fn classify(&self, entry: &ExtractedEntry) -> NewUnit {
        let regular = matches!(entry.kind, EntryKind::File { size } if size > 0);
        if regular && self.is_convertible_name(&entry.name) {
            NewUnit::pending(&entry.name)
        } else {
            NewUnit::invalid(&entry.name, INVALID_DOCUMENT_MESSAGE)
        }
    }

    fn is_convertible_name(&self, name: &str) -> bool {
        let base = name.rsplit('/').next().unwrap_or(name);

        if self
            .ignored_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && base.starts_with(prefix.as_str()))
        {
            return false;
        }

        match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .accepted_extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }

    /// Extract the job's upload and create all of its units in one commit.
    ///
    /// An archive that cannot be read fails the job without creating any
    /// units. Otherwise the job moves to `IN_PROGRESS`, or to `FAILED` when
    /// no entry is convertible. Nothing is dispatched here.
    pub async fn decompose(&self, job_id: &str) -> Result<DecompositionCommit, OrchestratorError> {
        let upload = self.workspace.upload_path(job_id);
        let input_dir = self.workspace.input_dir(job_id);

        let entries = match extract_archive(&upload, &input_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Batch archive unreadable, failing job");
                let job = self.store.fail_job(job_id)?;
                metrics::JOBS_FINISHED.with_label_values(&["failed"]).inc();
                return Ok(DecompositionCommit {
                    job,
                    units: Vec::new(),
                });
            }
        };

        let units: Vec<NewUnit> = entries.iter().map(|entry| self.classify(entry)).collect();
        let commit = self.store.commit_decomposition(job_id, units)?;

        let pending = commit.pending_unit_ids().len();
        let rejected = commit.units.len() - pending;
        metrics::UNITS_TOTAL
            .with_label_values(&["rejected"])
            .inc_by(rejected as u64);

        if commit.job.status == JobStatus::Failed {
            metrics::JOBS_FINISHED.with_label_values(&["failed"]).inc();
            info!(job_id = %job_id, entries = commit.units.len(), "No convertible documents, job failed");
        } else {
            info!(job_id = %job_id, pending, rejected, "Job decomposed");
        }

        Ok(commit)
    }
}
