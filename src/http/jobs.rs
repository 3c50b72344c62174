use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use analyst_common::model::{Job, PhaseResult};
use analyst_common::plan::WorkflowExecutionPlan;

use super::errors::ApiError;
use super::orchestrator::spawn_execution;
use super::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/results", get(get_results))
        .route("/jobs/{id}/phases/{n}", get(get_phase))
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub plan: WorkflowExecutionPlan,
    pub document_ids: Vec<String>,
}

/// Executes an already-synthesized plan (typically produced by
/// `POST /orchestrator/plan` or `/plan/adaptive`). `POST /orchestrator/analyze`
/// is the single-call shortcut that synthesizes and runs in one request.
async fn create_job(
    State(state): State<SharedState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let dedupe_key = format!("{}:{}", request.plan.plan_id, request.document_ids.join(","));
    let job = state.job_manager.create_job_for_plan(&request.plan, &request.document_ids, &dedupe_key)?;
    spawn_execution(&state, job.job_id.clone(), request.plan);
    Ok(Json(job))
}

async fn list_jobs(State(state): State<SharedState>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.db.list_jobs()?))
}

async fn get_job(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.job_manager.get_job(&id)?))
}

async fn delete_job(State(state): State<SharedState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.job_manager.delete_job(&id)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub cancel_token: String,
}

async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<(), ApiError> {
    state.job_manager.request_cancel(&id, &request.cancel_token)?;
    Ok(())
}

async fn get_results(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.job_manager.get_job(&id)?))
}

async fn get_phase(
    State(state): State<SharedState>,
    Path((id, n)): Path<(String, f64)>,
) -> Result<Json<PhaseResult>, ApiError> {
    let job = state.job_manager.get_job(&id)?;
    job.phase_results
        .get(&n.to_string())
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("phase {n} has no result yet for job {id}")))
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use super::super::state::test_support::in_memory_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn list_jobs_starts_empty() {
        let app = build_router(in_memory_state());
        let req = Request::builder().uri("/jobs").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let app = build_router(in_memory_state());
        let req = Request::builder().uri("/jobs/ghost").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
