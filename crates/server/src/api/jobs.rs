//! Job inspection handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use relister_core::{Checkpoint, JobFilter, JobRecord, JobStatus};

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub batch_id: Option<String>,
    /// One of queued, running, paused, success, failed, terminated
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// A job and its resume point.
#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: JobRecord,
    pub checkpoint: Option<Checkpoint>,
}

fn store_error(e: impl std::fmt::Display) -> ApiError {
    error!("Job store error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(batch_id) = params.batch_id {
        filter = filter.with_batch(batch_id);
    }
    if let Some(status) = params.status.as_deref() {
        let status = JobStatus::parse(status).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown job status '{}'", status),
            )
        })?;
        filter = filter.with_status(status);
    }

    let store = state.store();
    let jobs = store.list_jobs(&filter).map_err(store_error)?;
    let total = store.count_jobs(&filter).map_err(store_error)?;

    Ok(Json(ListJobsResponse {
        jobs,
        total,
        limit,
        offset,
    }))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    let store = state.store();
    let job = store
        .get_job(&id)
        .map_err(store_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("job not found: {}", id)))?;
    let checkpoint = store.load_checkpoint(&id).map_err(store_error)?;

    Ok(Json(JobDetailResponse { job, checkpoint }))
}
