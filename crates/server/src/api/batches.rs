//! Batch control handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use relister_core::{
    BatchAccepted, BulkJobRequest, BulkOrchestrator, OrchestratorError, OrchestratorStatus,
    RunState,
};

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Response for pause / resume / terminate.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub run_state: RunState,
}

fn orchestrator(state: &AppState) -> Result<&BulkOrchestrator, ApiError> {
    state.orchestrator().ok_or_else(|| {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no browser bridge is configured",
        )
    })
}

fn map_error(e: OrchestratorError) -> ApiError {
    let status = match &e {
        OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::BatchInProgress(_) | OrchestratorError::NoActiveBatch => {
            StatusCode::CONFLICT
        }
        OrchestratorError::BatchNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("Batch request failed: {}", e);
    }
    error_response(status, e.to_string())
}

/// Start a batch.
pub async fn start_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkJobRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>), ApiError> {
    let orchestrator = orchestrator(&state)?;
    let accepted = orchestrator.start(request).await.map_err(map_error)?;
    info!(
        "Accepted batch {} ({} jobs, concurrency {})",
        accepted.batch_id, accepted.job_count, accepted.concurrency
    );
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Status of the running batch, or an idle status.
pub async fn current_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OrchestratorStatus>, ApiError> {
    let orchestrator = orchestrator(&state)?;
    Ok(Json(orchestrator.status().await))
}

pub async fn pause_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    let run_state = orchestrator(&state)?.pause().await.map_err(map_error)?;
    Ok(Json(ControlResponse { run_state }))
}

pub async fn resume_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    let run_state = orchestrator(&state)?.resume().await.map_err(map_error)?;
    Ok(Json(ControlResponse { run_state }))
}

pub async fn terminate_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    let run_state = orchestrator(&state)?.terminate().await.map_err(map_error)?;
    Ok(Json(ControlResponse { run_state }))
}
