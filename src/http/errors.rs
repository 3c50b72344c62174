use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::errors::{JobError, PhaseError, PlanError, WorkflowError};

/// Uniform error envelope: every route returns `{"detail": "..."}` on
/// failure, the status code carrying the category.
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"detail": message}))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            JobError::AlreadyTerminal { .. } | JobError::BadCancelToken { .. } => ApiError::Conflict(err.to_string()),
            JobError::NotResumable { .. } => ApiError::Conflict(err.to_string()),
            JobError::Db(_) | JobError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Unparseable | PlanError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            PlanError::Llm(_) | PlanError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<PhaseError> for ApiError {
    fn from(err: PhaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
