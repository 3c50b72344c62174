//! End-to-end HTTP scenarios against the full router, with the Anthropic
//! Messages API stubbed out by `wiremock`. No real network calls ever leave
//! the process.

use std::sync::Arc;
use std::time::Duration;

use analyst_common::documents::Document;
use analyst_common::plan::{PhaseExecutionSpec, PhaseTarget, WorkflowExecutionPlan};
use analyst_common::registry::CapabilityEngine;
use analyst_orchestrator::config::Config;
use analyst_orchestrator::db::Database;
use analyst_orchestrator::http::{build_router, AppState};
use analyst_orchestrator::job_manager::JobManager;
use analyst_orchestrator::llm::LlmClient;
use analyst_orchestrator::registries::{CatalogFile, Registries};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use clap::Parser;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn skeptic_engine() -> CapabilityEngine {
    CapabilityEngine {
        engine_key: "skeptic".into(),
        display_name: "Skeptic".into(),
        system_prompt: "Be skeptical.".into(),
        default_model: "claude-sonnet-4".into(),
        supports_thinking: false,
        default_passes: 1,
    }
}

/// One `message_start` / `content_block_delta` / `message_delta` SSE
/// sequence, the minimum shape `llm/client.rs::drain_stream` understands.
fn sse_body(text: &str) -> String {
    format!(
        "event: message_start\ndata: {{\"type\":\"message_start\",\"message\":{{\"model\":\"claude-sonnet-4\",\"usage\":{{\"input_tokens\":10}}}}}}\n\n\
         event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"delta\":{{\"text\":{text:?}}}}}\n\n\
         event: message_delta\ndata: {{\"type\":\"message_delta\",\"usage\":{{\"output_tokens\":5}}}}\n\n\
         data: [DONE]\n\n"
    )
}

async fn mock_anthropic() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body("a skeptical analysis"), "text/event-stream"),
        )
        .mount(&server)
        .await;
    server
}

fn state_with(server: &MockServer, catalog: CatalogFile) -> Arc<AppState> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registries = Arc::new(Registries::from_catalog(catalog));
    let llm = Arc::new(LlmClient::new("test-key", server.uri()).unwrap());
    let job_manager = Arc::new(JobManager::new(Arc::clone(&db)));
    let config = Arc::new(Config::parse_from(["analyst-orchestrator"]));
    Arc::new(AppState { db, registries, llm, job_manager, config })
}

fn single_phase_plan(plan_id: &str) -> WorkflowExecutionPlan {
    WorkflowExecutionPlan {
        plan_id: plan_id.to_string(),
        research_question: "what does the corpus argue?".to_string(),
        target_works: vec![],
        phases: vec![PhaseExecutionSpec {
            phase_number: 1.0,
            phase_name: "initial read".to_string(),
            target: PhaseTarget::Engine { engine_key: "skeptic".to_string(), passes: 1 },
            iteration_mode: Default::default(),
            depends_on: vec![],
            model_hint: None,
            requires_full_documents: false,
            per_work_overrides: vec![],
            supplementary_chains: vec![],
            max_context_chars_override: None,
            per_work_chain_map: Default::default(),
            skip: false,
            skip_reason: None,
            default_depth: None,
            engine_depth_overrides: Default::default(),
            chapter_targets: vec![],
            context_emphasis: None,
            rationale: None,
        }],
        chains: vec![],
        view_recommendations: vec![],
        created_at: chrono::Utc::now(),
    }
}

async fn get_job(app: &axum::Router, job_id: &str) -> serde_json::Value {
    let req = Request::builder().uri(format!("/jobs/{job_id}")).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_for_terminal(app: &axum::Router, job_id: &str) -> serde_json::Value {
    for _ in 0..50 {
        let job = get_job(app, job_id).await;
        let status = job["status"].as_str().unwrap();
        if status != "pending" && status != "running" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} never reached a terminal status");
}

#[tokio::test]
async fn scenario_single_engine_phase_completes_with_one_output() {
    let server = mock_anthropic().await;
    let catalog = CatalogFile { engines: vec![skeptic_engine()], ..Default::default() };
    let state = state_with(&server, catalog);
    let app = build_router(state.clone());

    let plan = single_phase_plan("plan-single");
    let req = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"plan": plan, "document_ids": []}).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["total_llm_calls"], 1);

    let phase_req = Request::builder().uri(format!("/jobs/{job_id}/phases/1")).body(Body::empty()).unwrap();
    let phase_resp = app.oneshot(phase_req).await.unwrap();
    assert_eq!(phase_resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn scenario_zero_phase_plan_completes_with_no_outputs() {
    let server = mock_anthropic().await;
    let state = state_with(&server, CatalogFile::default());
    let app = build_router(state.clone());

    let mut plan = single_phase_plan("plan-empty");
    plan.phases.clear();

    let req = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"plan": plan, "document_ids": []}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["total_llm_calls"], 0);
    assert!(finished["phase_results"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_idempotent_job_creation_returns_same_job() {
    let server = mock_anthropic().await;
    let catalog = CatalogFile { engines: vec![skeptic_engine()], ..Default::default() };
    let state = state_with(&server, catalog);
    let app = build_router(state.clone());

    let plan = single_phase_plan("plan-dup");
    let body = serde_json::json!({"plan": plan, "document_ids": ["docA"]}).to_string();

    let req1 = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body.clone()))
        .unwrap();
    let resp1 = app.clone().oneshot(req1).await.unwrap();
    let bytes1 = resp1.into_body().collect().await.unwrap().to_bytes();
    let job1: serde_json::Value = serde_json::from_slice(&bytes1).unwrap();

    let req2 = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let resp2 = app.clone().oneshot(req2).await.unwrap();
    let bytes2 = resp2.into_body().collect().await.unwrap().to_bytes();
    let job2: serde_json::Value = serde_json::from_slice(&bytes2).unwrap();

    assert_eq!(job1["job_id"], job2["job_id"]);

    let req = Request::builder().uri("/jobs").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let jobs: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn scenario_missing_document_does_not_abort_the_job() {
    let server = mock_anthropic().await;
    let catalog = CatalogFile { engines: vec![skeptic_engine()], ..Default::default() };
    let state = state_with(&server, catalog);
    let app = build_router(state.clone());

    // document_ids references an id that was never inserted into the store.
    let plan = single_phase_plan("plan-ghost-doc");
    let req = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"plan": plan, "document_ids": ["does-not-exist"]}).to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "completed");
}

#[tokio::test]
async fn scenario_document_crud_round_trips_through_the_full_router() {
    let server = mock_anthropic().await;
    let state = state_with(&server, CatalogFile::default());
    let app = build_router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/documents")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"title": "Report", "content": "full text here"}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let doc: Document = serde_json::from_slice(&bytes).unwrap();

    let list_req = Request::builder().uri("/documents").body(Body::empty()).unwrap();
    let list_resp = app.clone().oneshot(list_req).await.unwrap();
    let bytes = list_resp.into_body().collect().await.unwrap().to_bytes();
    let docs: Vec<Document> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].document_id, doc.document_id);

    let del_req = Request::builder()
        .method("DELETE")
        .uri(format!("/documents/{}", doc.document_id))
        .body(Body::empty())
        .unwrap();
    let del_resp = app.clone().oneshot(del_req).await.unwrap();
    assert_eq!(del_resp.status(), StatusCode::OK);

    let get_req = Request::builder().uri(format!("/documents/{}", doc.document_id)).body(Body::empty()).unwrap();
    let get_resp = app.oneshot(get_req).await.unwrap();
    assert_eq!(get_resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scenario_dependency_cycle_falls_back_to_sequential_without_deadlock() {
    let server = mock_anthropic().await;
    let catalog = CatalogFile { engines: vec![skeptic_engine()], ..Default::default() };
    let state = state_with(&server, catalog);
    let app = build_router(state.clone());

    let mut plan = single_phase_plan("plan-cycle");
    plan.phases.push(PhaseExecutionSpec {
        phase_number: 2.0,
        phase_name: "rebuttal".to_string(),
        target: PhaseTarget::Engine { engine_key: "skeptic".to_string(), passes: 1 },
        iteration_mode: Default::default(),
        depends_on: vec![1.0],
        model_hint: None,
        requires_full_documents: false,
        per_work_overrides: vec![],
        supplementary_chains: vec![],
        max_context_chars_override: None,
        per_work_chain_map: Default::default(),
        skip: false,
        skip_reason: None,
        default_depth: None,
        engine_depth_overrides: Default::default(),
        chapter_targets: vec![],
        context_emphasis: None,
        rationale: None,
    });
    // Introduce a cycle: phase 1 now also depends on phase 2.
    plan.phases[0].depends_on.push(2.0);

    let req = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({"plan": plan, "document_ids": []}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = job["job_id"].as_str().unwrap().to_string();

    let finished = wait_for_terminal(&app, &job_id).await;
    assert_eq!(finished["status"], "completed");
    assert_eq!(finished["total_llm_calls"], 2);
}
