//! Job API handlers.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use docbatch_core::{
    Job, JobFilter, JobSnapshot, JobStatus, OrchestratorError, Unit, UnitStatus,
};

use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

/// Multipart field carrying the batch archive
const UPLOAD_FIELD: &str = "file";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status (`PENDING`, `IN_PROGRESS`, `COMPLETED`, `FAILED`)
    pub status: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response to an accepted upload
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// One unit of a job
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub filename: String,
    pub status: UnitStatus,
    pub error: Option<String>,
}

impl From<Unit> for FileResponse {
    fn from(unit: Unit) -> Self {
        Self {
            filename: unit.name,
            status: unit.status,
            error: unit.error_message,
        }
    }
}

/// Job snapshot with its units
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub files: Vec<FileResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl From<JobSnapshot> for JobResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        let job = snapshot.job;
        Self {
            download_url: download_url(&job),
            job_id: job.id,
            status: job.status,
            created_at: job.created_at.to_rfc3339(),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
            files: snapshot.units.into_iter().map(FileResponse::from).collect(),
        }
    }
}

/// Job without its units, for listings
#[derive(Debug, Serialize)]
pub struct JobSummaryResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl From<Job> for JobSummaryResponse {
    fn from(job: Job) -> Self {
        Self {
            download_url: download_url(&job),
            job_id: job.id,
            status: job.status,
            created_at: job.created_at.to_rfc3339(),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSummaryResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(JobErrorResponse {
            error: message.into(),
        }),
    )
}

fn download_url(job: &Job) -> Option<String> {
    (job.status == JobStatus::Completed && job.result_location.is_some())
        .then(|| format!("/api/v1/jobs/{}/download", job.id))
}

/// Job ids are UUIDs; anything else is rejected before touching the store.
fn parse_job_id(id: &str) -> Result<String, ApiError> {
    Uuid::parse_str(id)
        .map(|uuid| uuid.to_string())
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid job id: {}", id)))
}

fn orchestrator_error(e: OrchestratorError) -> ApiError {
    match e {
        OrchestratorError::NotFound(_) => api_error(StatusCode::NOT_FOUND, "Job not found"),
        OrchestratorError::NotReady { .. } => {
            api_error(StatusCode::BAD_REQUEST, "Job not ready or failed")
        }
        OrchestratorError::ResultMissing(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "File missing from storage",
        ),
        e @ OrchestratorError::Conflict { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
        e => {
            error!(error = %e, "Job request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept a batch archive (multipart field `file`)
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if !file_name.ends_with(".zip") {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Only .zip files are allowed.",
            ));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Missing multipart field '{}'", UPLOAD_FIELD),
        ));
    };

    let job = state
        .orchestrator()
        .submit_job(&file_name, &bytes)
        .await
        .map_err(orchestrator_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// List jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status.as_deref() {
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        filter = filter.with_status(status);
    }

    let orchestrator = state.orchestrator();
    let jobs = orchestrator.list_jobs(&filter).map_err(orchestrator_error)?;
    let total = orchestrator.count_jobs(&filter).map_err(orchestrator_error)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobSummaryResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a job with all of its units
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let snapshot = state
        .orchestrator()
        .get_job(&job_id)
        .map_err(orchestrator_error)?;
    Ok(Json(JobResponse::from(snapshot)))
}

/// Download the result archive of a completed job
pub async fn download_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let path = state
        .orchestrator()
        .result_archive(&job_id)
        .await
        .map_err(orchestrator_error)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        warn!(job_id = %job_id, error = %e, "Failed to read result archive");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "File missing from storage")
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"converted_{}.zip\"", job_id),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Delete a finished job and its files
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let snapshot = state
        .orchestrator()
        .delete_job(&job_id)
        .await
        .map_err(orchestrator_error)?;

    let mut response = JobResponse::from(snapshot);
    response.download_url = None;
    Ok(Json(response))
}
