//! On-disk layout of job workspaces.
//!
//! ```text
//! <root>/<job_id>/upload.zip
//! <root>/<job_id>/input/<entry name>
//! <root>/<job_id>/output/<unit_id>/<stem>.<format>
//! <root>/<job_id>/result.zip
//! <scratch_dir>/<job_id>_<unit_id>/
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;

const UPLOAD_FILE: &str = "upload.zip";
const RESULT_FILE: &str = "result.zip";

/// Resolves and manages the directories owned by each job and unit.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    scratch_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root, &config.scratch_dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn upload_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(UPLOAD_FILE)
    }

    pub fn input_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("input")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    /// Each unit writes into its own directory so entries sharing a file
    /// name in different archive folders cannot overwrite each other.
    pub fn unit_output_dir(&self, job_id: &str, unit_id: i64) -> PathBuf {
        self.output_dir(job_id).join(unit_id.to_string())
    }

    pub fn result_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(RESULT_FILE)
    }

    /// The result location as persisted on the job, relative to the root.
    pub fn result_location(&self, job_id: &str) -> String {
        format!("{}/{}", job_id, RESULT_FILE)
    }

    /// Turn a persisted result location back into a path.
    pub fn resolve(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    /// Converter profile directory, unique per (job, unit).
    pub fn scratch_path(&self, job_id: &str, unit_id: i64) -> PathBuf {
        self.scratch_dir.join(format!("{}_{}", job_id, unit_id))
    }

    /// Create the job directory tree and store the uploaded archive.
    pub async fn store_upload(&self, job_id: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(self.input_dir(job_id)).await?;
        tokio::fs::create_dir_all(self.output_dir(job_id)).await?;

        let path = self.upload_path(job_id);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Create a fresh scratch directory, clearing leftovers from an earlier
    /// attempt.
    pub async fn prepare_scratch(&self, job_id: &str, unit_id: i64) -> io::Result<PathBuf> {
        let path = self.scratch_path(job_id, unit_id);
        remove_dir_if_exists(&path).await?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    pub async fn remove_scratch(&self, job_id: &str, unit_id: i64) -> io::Result<()> {
        remove_dir_if_exists(&self.scratch_path(job_id, unit_id)).await
    }

    /// Remove everything stored for a job.
    pub async fn remove_job(&self, job_id: &str) -> io::Result<()> {
        remove_dir_if_exists(&self.job_dir(job_id)).await
    }
}

async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
