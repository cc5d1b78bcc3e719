//! Core job data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error message recorded for entries that cannot be converted: wrong
/// extension, lock files, directories, empty or unreadable entries, and
/// documents the converter rejects.
pub const INVALID_DOCUMENT_MESSAGE: &str = "Invalid file format or corrupted document";

/// Error message recorded when the converter exceeds its time budget.
pub const TIMEOUT_MESSAGE: &str = "Conversion timed out";

/// Error message recorded when a unit's real outcome could not be saved.
pub const UNRECORDED_OUTCOME_MESSAGE: &str = "Failed to record conversion outcome";

/// A status string read back from storage that matches no known variant.
#[derive(Debug, Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Lifecycle of a batch job.
///
/// `PENDING -> IN_PROGRESS -> {COMPLETED, FAILED}`, with a direct
/// `PENDING -> FAILED` edge for batches that never reach dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Lifecycle of a single unit: `PENDING -> {COMPLETED, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Pending,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "PENDING",
            UnitStatus::Completed => "COMPLETED",
            UnitStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::Pending)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(UnitStatus::Pending),
            "COMPLETED" => Ok(UnitStatus::Completed),
            "FAILED" => Ok(UnitStatus::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// One batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the job reaches a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Relative location of the result archive under the storage root.
    /// Only present for `COMPLETED` jobs.
    pub result_location: Option<String>,
}

/// One archive entry and its conversion outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub job_id: String,
    /// Entry name as it appeared in the archive.
    pub name: String,
    pub status: UnitStatus,
    pub error_message: Option<String>,
}

/// A job together with all of its units, read in a single transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub units: Vec<Unit>,
}

impl JobSnapshot {
    pub fn count_units(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    /// Ids of units still waiting for an outcome.
    pub fn pending_unit_ids(&self) -> Vec<i64> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .map(|u| u.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("in_progress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_transitions_are_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn test_serde_uses_upper_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let status: UnitStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(status, UnitStatus::Failed);
    }

    #[test]
    fn test_snapshot_helpers() {
        let job = Job {
            id: "job-1".to_string(),
            status: JobStatus::InProgress,
            created_at: Utc::now(),
            finished_at: None,
            result_location: None,
        };
        let unit = |id: i64, status: UnitStatus| Unit {
            id,
            job_id: "job-1".to_string(),
            name: format!("{id}.docx"),
            status,
            error_message: None,
        };
        let snapshot = JobSnapshot {
            job,
            units: vec![
                unit(1, UnitStatus::Completed),
                unit(2, UnitStatus::Pending),
                unit(3, UnitStatus::Pending),
            ],
        };

        assert_eq!(snapshot.count_units(UnitStatus::Completed), 1);
        assert_eq!(snapshot.pending_unit_ids(), vec![2, 3]);
    }
}
