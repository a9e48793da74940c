//! Task control API handlers.
//!
//! Task creation and uploads live outside this service; these endpoints only
//! observe and steer tasks the engine works on.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use convertd_core::{CancelOutcome, EngineError, TaskProgressView, TaskStatus};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Response for a cancel request
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub outcome: CancelOutcome,
}

/// Response for a submit hint
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub accepted: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TaskErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

/// Engine errors mapped onto HTTP responses.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = match &self.0 {
            EngineError::TaskNotFound(_) => (StatusCode::NOT_FOUND, None),
            EngineError::InvalidState { status, .. } => (StatusCode::CONFLICT, Some(*status)),
            EngineError::Store(e) => {
                error!(error = %e, "Task store error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let body = TaskErrorResponse {
            error: self.0.to_string(),
            status,
        };
        (code, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Live status and progress of a task
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskProgressView>, ApiError> {
    Ok(Json(state.engine().progress(&id).await?))
}

/// Cancel a task
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = state.engine().cancel(&id).await?;
    Ok(Json(CancelResponse {
        task_id: id,
        outcome,
    }))
}

/// Tell the engine a task was just queued
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<SubmitResponse>) {
    state.engine().submit(&id);
    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: id,
            accepted: true,
        }),
    )
}
