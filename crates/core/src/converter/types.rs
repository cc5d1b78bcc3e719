//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single-file conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub job_id: String,
    pub unit_id: i64,
    pub input_path: PathBuf,
    /// Directory the converter writes into.
    pub output_dir: PathBuf,
    /// Converter profile directory, owned exclusively by this (job, unit).
    pub profile_dir: PathBuf,
    pub timeout: Duration,
}

impl ConversionJob {
    /// Where a converter is expected to leave its output:
    /// `<output_dir>/<input stem>.<format>`.
    pub fn expected_output(&self, format: &str) -> PathBuf {
        expected_output(&self.input_path, &self.output_dir, format)
    }
}

pub(crate) fn expected_output(input: &Path, output_dir: &Path, format: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    let mut name = stem;
    name.push(".");
    name.push(format);
    output_dir.join(name)
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub unit_id: i64,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_output_replaces_extension() {
        let job = ConversionJob {
            job_id: "j".to_string(),
            unit_id: 1,
            input_path: PathBuf::from("/in/reports/q1.final.docx"),
            output_dir: PathBuf::from("/out/1"),
            profile_dir: PathBuf::from("/tmp/j_1"),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(
            job.expected_output("pdf"),
            PathBuf::from("/out/1/q1.final.pdf")
        );
    }
}
