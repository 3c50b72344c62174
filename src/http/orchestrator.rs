use axum::Json;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;

use analyst_common::plan::{OrchestratorPlanRequest, WorkflowExecutionPlan};

use crate::planner::Planner;
use crate::workflow_runner::WorkflowRunner;

use super::errors::ApiError;
use super::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/orchestrator/plan", post(plan_fixed))
        .route("/orchestrator/plan/adaptive", post(plan_adaptive))
        .route("/orchestrator/analyze", post(analyze))
}

async fn plan_fixed(
    State(state): State<SharedState>,
    Json(request): Json<OrchestratorPlanRequest>,
) -> Result<Json<WorkflowExecutionPlan>, ApiError> {
    let planner = Planner::new(&state.registries, &state.llm, &state.db, state.config.fast_model.clone(), state.config.strong_model.clone());
    let plan = planner.plan_fixed(&request).await?;
    Ok(Json(plan))
}

async fn plan_adaptive(
    State(state): State<SharedState>,
    Json(request): Json<OrchestratorPlanRequest>,
) -> Result<Json<WorkflowExecutionPlan>, ApiError> {
    let planner = Planner::new(&state.registries, &state.llm, &state.db, state.config.fast_model.clone(), state.config.strong_model.clone());
    let plan = planner.plan_adaptive(&request).await?;
    Ok(Json(plan))
}

#[derive(Deserialize)]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    pub plan_request: OrchestratorPlanRequest,
    #[serde(default)]
    pub adaptive: bool,
}

/// One-shot entry point: synthesizes a plan, creates the job, and kicks off
/// execution in the background. Returns immediately with the created job;
/// progress is polled via `GET /jobs/{id}`.
async fn analyze(
    State(state): State<SharedState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<analyst_common::model::Job>, ApiError> {
    let planner = Planner::new(&state.registries, &state.llm, &state.db, state.config.fast_model.clone(), state.config.strong_model.clone());
    let plan = if request.adaptive {
        planner.plan_adaptive(&request.plan_request).await?
    } else {
        planner.plan_fixed(&request.plan_request).await?
    };

    let dedupe_key = format!("{}:{}", request.plan_request.research_question, request.plan_request.document_ids.join(","));
    let job = state
        .job_manager
        .create_job_for_plan(&plan, &request.plan_request.document_ids, &dedupe_key)?;

    spawn_execution(&state, job.job_id.clone(), plan);

    Ok(Json(job))
}

/// Fires the workflow off the request/response cycle. `state` is cloned
/// into the task's own future, so every `&state.field` reference borrows
/// from data the task itself owns for its whole lifetime.
pub(super) fn spawn_execution(state: &SharedState, job_id: String, plan: analyst_common::plan::WorkflowExecutionPlan) {
    let state = SharedState::clone(state);
    tokio::spawn(async move {
        if let Err(err) = run_job(&state, &job_id, &plan).await {
            tracing::warn!(job_id = %job_id, error = %err, "job execution failed");
            let _ = state.job_manager.mark_failed(&job_id, &err.to_string());
        }
    });
}

async fn run_job(state: &SharedState, job_id: &str, plan: &analyst_common::plan::WorkflowExecutionPlan) -> anyhow::Result<()> {
    let job = state.job_manager.get_job(job_id)?;
    let document_ids: Vec<String> = job
        .document_ids
        .iter()
        .filter(|(k, _)| *k != "__dedupe_key")
        .map(|(_, v)| v.clone())
        .collect();
    let documents = state.db.get_documents(&document_ids)?;

    state.job_manager.mark_running(job_id)?;

    let runner = WorkflowRunner::new(
        &state.registries,
        &state.llm,
        &state.db,
        state.config.dependency_group_concurrency,
        state.config.per_work_concurrency,
    );
    runner.run(job_id, plan, &documents).await?;
    state.job_manager.mark_completed(job_id)?;
    Ok(())
}
