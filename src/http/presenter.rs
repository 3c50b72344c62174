use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use analyst_common::plan::ViewRefinement;

use crate::presentation::{assemble, PresentationBridge, ViewPayload};

use super::errors::ApiError;
use super::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/presenter/prepare/{job_id}", post(prepare))
        .route("/presenter/compose/{job_id}", post(compose))
        .route("/presenter/status/{job_id}", get(status))
        .route("/presenter/page/{job_id}", get(page))
        .route("/presenter/view/{job_id}/{view_key}", get(view))
        .route("/presenter/refine-views/{job_id}", post(refine))
}

#[derive(Serialize)]
struct ComposeResult {
    rendered_count: usize,
}

async fn run_bridge(state: &SharedState, job_id: &str, force: bool) -> Result<Vec<ViewPayload>, ApiError> {
    let job = state.job_manager.get_job(job_id)?;
    let plan = job
        .plan_snapshot
        .ok_or_else(|| ApiError::Conflict(format!("job {job_id} has no plan snapshot to present")))?;

    let bridge = PresentationBridge::new(&state.llm, &state.db, state.config.fast_model.clone(), state.config.strong_model.clone());
    let views = state.registries.views();
    let tasks = bridge.plan_tasks(job_id, views, &plan.target_works)?;
    let sections = bridge.execute(job_id, views, tasks, force).await?;
    Ok(assemble(views, &sections, false))
}

async fn prepare(State(state): State<SharedState>, Path(job_id): Path<String>) -> Result<Json<ComposeResult>, ApiError> {
    let payloads = run_bridge(&state, &job_id, false).await?;
    Ok(Json(ComposeResult { rendered_count: count_nodes(&payloads) }))
}

async fn compose(State(state): State<SharedState>, Path(job_id): Path<String>) -> Result<Json<ComposeResult>, ApiError> {
    let payloads = run_bridge(&state, &job_id, true).await?;
    Ok(Json(ComposeResult { rendered_count: count_nodes(&payloads) }))
}

fn count_nodes(payloads: &[ViewPayload]) -> usize {
    payloads.iter().map(|p| 1 + count_nodes(&p.children)).sum()
}

#[derive(Serialize)]
struct PresenterStatus {
    job_status: String,
    has_plan: bool,
}

async fn status(State(state): State<SharedState>, Path(job_id): Path<String>) -> Result<Json<PresenterStatus>, ApiError> {
    let job = state.job_manager.get_job(&job_id)?;
    Ok(Json(PresenterStatus {
        job_status: job.status.to_string(),
        has_plan: job.plan_snapshot.is_some(),
    }))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    slim: bool,
}

async fn page(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<ViewPayload>>, ApiError> {
    let payloads = run_bridge(&state, &job_id, false).await?;
    if query.slim {
        return Ok(Json(strip_content(payloads)));
    }
    Ok(Json(payloads))
}

fn strip_content(payloads: Vec<ViewPayload>) -> Vec<ViewPayload> {
    payloads
        .into_iter()
        .map(|mut p| {
            p.content = None;
            p.per_work_content.clear();
            p.children = strip_content(p.children);
            p
        })
        .collect()
}

async fn view(
    State(state): State<SharedState>,
    Path((job_id, view_key)): Path<(String, String)>,
) -> Result<Json<ViewPayload>, ApiError> {
    let payloads = run_bridge(&state, &job_id, false).await?;
    find_view(&payloads, &view_key)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("view {view_key} not found for job {job_id}")))
}

fn find_view<'a>(payloads: &'a [ViewPayload], view_key: &str) -> Option<&'a ViewPayload> {
    for payload in payloads {
        if payload.view_key == view_key {
            return Some(payload);
        }
        if let Some(found) = find_view(&payload.children, view_key) {
            return Some(found);
        }
    }
    None
}

#[derive(Deserialize)]
struct RefineRequest {
    view_key: String,
    instruction: String,
}

/// Rewrites one assembled view's prose per a free-text instruction (e.g.
/// "make this shorter"). The refinement is cached per (job, view) — a
/// second refine call on the same view overwrites the prior one, it is not
/// layered.
async fn refine(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
    Json(request): Json<RefineRequest>,
) -> Result<Json<ViewRefinement>, ApiError> {
    let payloads = run_bridge(&state, &job_id, false).await?;
    let current = find_view(&payloads, &request.view_key)
        .and_then(|p| p.content.clone())
        .ok_or_else(|| ApiError::NotFound(format!("view {} not found for job {job_id}", request.view_key)))?;

    let refine_request = crate::llm::LlmRequest {
        model: state.config.strong_model.clone(),
        system_prompt: "You revise presentation prose per the user's instruction, preserving meaning.".to_string(),
        user_prompt: format!("Instruction: {}\n\nOriginal:\n{current}", request.instruction),
        max_tokens: 4096,
        allow_thinking: false,
    };
    let response = state.llm.call(&refine_request).await.map_err(crate::errors::PhaseError::Llm)?;

    let refinement = ViewRefinement {
        job_id: job_id.clone(),
        view_key: request.view_key.clone(),
        instruction: request.instruction.clone(),
        refined_content: response.content,
        created_at: Utc::now(),
    };
    state.db.put_view_refinement(&refinement)?;
    Ok(Json(refinement))
}
