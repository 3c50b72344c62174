//! Plan synthesis: turns a research question + corpus into a
//! `WorkflowExecutionPlan`. Two modes: `fixed`, which runs the catalog's
//! default workflow but still calls an LLM to attach a rationale to each
//! phase, and `adaptive`, which samples every document, feeds the full
//! engine/stance/chain/view catalog to an LLM, and asks it to propose a
//! phase list tailored to the research question.
//!
//! The JSON-extraction idiom (direct parse, then fence-strip, then
//! balanced-brace extraction) mirrors `src/factory/planner.rs`'s
//! `PlanResponse::parse`; the semantics it extracts mirror
//! `original_source/src/orchestrator/planner.py`.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use analyst_common::plan::{OrchestratorPlanRequest, PhaseExecutionSpec, WorkflowExecutionPlan};

use crate::db::Database;
use crate::errors::PlanError;
use crate::llm::{LlmClient, LlmRequest};
use crate::registries::Registries;
use crate::sampler::{self, DocumentProfile};

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in text[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_phases(json: &str) -> Result<Vec<PhaseExecutionSpec>, PlanError> {
    if let Ok(phases) = serde_json::from_str::<Vec<PhaseExecutionSpec>>(json) {
        return Ok(phases);
    }
    let cleaned = json.replace("```json", "").replace("```", "");
    if let Ok(phases) = serde_json::from_str::<Vec<PhaseExecutionSpec>>(cleaned.trim()) {
        return Ok(phases);
    }
    let extracted = extract_json_object(&cleaned).unwrap_or(cleaned.trim());
    // The model may have wrapped the array in an object like {"phases": [...]}.
    if let Ok(wrapped) = serde_json::from_str::<serde_json::Value>(extracted) {
        if let Some(arr) = wrapped.get("phases") {
            return serde_json::from_value(arr.clone()).map_err(|_| PlanError::Unparseable);
        }
    }
    serde_json::from_str(extracted).map_err(|_| PlanError::Unparseable)
}

fn parse_rationales(json: &str) -> Option<HashMap<String, String>> {
    let cleaned = json.replace("```json", "").replace("```", "");
    if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(cleaned.trim()) {
        return Some(map);
    }
    let extracted = extract_json_object(&cleaned)?;
    serde_json::from_str(extracted).ok()
}

pub struct Planner<'a> {
    registries: &'a Registries,
    llm: &'a LlmClient,
    db: &'a Database,
    fast_model: String,
    strong_model: String,
}

impl<'a> Planner<'a> {
    pub fn new(
        registries: &'a Registries,
        llm: &'a LlmClient,
        db: &'a Database,
        fast_model: impl Into<String>,
        strong_model: impl Into<String>,
    ) -> Self {
        Self {
            registries,
            llm,
            db,
            fast_model: fast_model.into(),
            strong_model: strong_model.into(),
        }
    }

    /// Renders the engine/stance/chain/view catalog as prose an LLM can
    /// reason about when proposing or justifying a phase list.
    fn catalog_summary(&self) -> String {
        let engines = self
            .registries
            .engines()
            .iter()
            .map(|e| format!("- {} ({}): {}", e.engine_key, e.display_name, e.system_prompt))
            .collect::<Vec<_>>()
            .join("\n");
        let stances = self
            .registries
            .stances()
            .iter()
            .map(|s| format!("- {}: {}", s.stance_key, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let chains = self
            .registries
            .chains()
            .iter()
            .map(|c| format!("- {} ({} steps, {:?})", c.chain_key, c.steps.len(), c.blend_mode))
            .collect::<Vec<_>>()
            .join("\n");
        let views = self
            .registries
            .views()
            .iter()
            .map(|v| format!("- {}", v.view_key))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Engines:\n{engines}\n\nStances:\n{stances}\n\nChains:\n{chains}\n\nViews:\n{views}"
        )
    }

    /// Fixed mode: the catalog's default workflow, unchanged in shape, with
    /// an LLM-authored rationale attached to each phase for the decision
    /// trace. A failed or unparseable rationale call degrades to the
    /// template running without rationales rather than failing the plan.
    pub async fn plan_fixed(&self, request: &OrchestratorPlanRequest) -> Result<WorkflowExecutionPlan, PlanError> {
        let mut phases = self.registries.default_workflow_phases();
        if phases.is_empty() {
            return Err(PlanError::Invalid("no default workflow phases configured".to_string()));
        }

        let template = phases
            .iter()
            .map(|p| format!("{}: {}", p.phase_number, p.phase_name))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Research question: {}\nDocuments: {}\n\nThis workflow template will run unchanged:\n{template}\n\n\
             Catalog available to it:\n{}\n\n\
             For each phase number, write a one or two sentence rationale for why it serves this research \
             question. Respond with a JSON object mapping phase_number (as a string) to rationale string.",
            request.research_question,
            request.document_ids.join(", "),
            self.catalog_summary(),
        );

        let llm_request = LlmRequest {
            model: self.strong_model.clone(),
            system_prompt: "You are an analysis planning assistant. Respond with JSON only.".to_string(),
            user_prompt: prompt,
            max_tokens: 2048,
            allow_thinking: false,
        };

        match self.llm.call(&llm_request).await {
            Ok(response) => match parse_rationales(&response.content) {
                Some(rationales) => {
                    for phase in &mut phases {
                        if let Some(r) = rationales.get(&phase.phase_number.to_string()) {
                            phase.rationale = Some(r.clone());
                        }
                    }
                }
                None => {
                    tracing::warn!("fixed planner rationale response wasn't parseable JSON, using template without rationale");
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "fixed planner rationale call failed, using template without rationale");
            }
        }

        Ok(WorkflowExecutionPlan {
            plan_id: Uuid::new_v4().to_string(),
            research_question: request.research_question.clone(),
            target_works: request.target_works.clone(),
            phases,
            chains: self.registries.chains().to_vec(),
            view_recommendations: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Adaptive mode: samples every document with the fast model, feeds
    /// the full catalog plus those profiles to the strong model, and asks
    /// it to propose a phase list. Falls back to the fixed plan if the
    /// response can't be salvaged into something valid.
    pub async fn plan_adaptive(&self, request: &OrchestratorPlanRequest) -> Result<WorkflowExecutionPlan, PlanError> {
        let documents = self
            .db
            .get_documents(&request.document_ids)
            .map_err(PlanError::Other)?;

        let profiles: Vec<(String, DocumentProfile)> = futures::future::join_all(documents.iter().map(|doc| async move {
            let profile = sampler::classify_document(self.llm, &self.fast_model, &doc.content).await;
            (doc.document_id.clone(), profile)
        }))
        .await;

        let profile_summary = profiles
            .iter()
            .map(|(id, profile)| {
                format!(
                    "- {id}: genre={}, domain={}, technical_level={}, reasoning_modes={:?}",
                    profile.genre, profile.domain, profile.technical_level, profile.reasoning_mode_tags
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Research question: {}\nDocuments: {}\n\nDocument profiles:\n{profile_summary}\n\n\
             Catalog available to you:\n{}\n\n\
             Propose a JSON array of phases for analyzing this corpus, drawing on the catalog above. \
             Each phase needs phase_number, phase_name, target (engine or chain), iteration_mode, depends_on, \
             and a short rationale explaining why it fits these documents.",
            request.research_question,
            request.document_ids.join(", "),
            self.catalog_summary(),
        );

        let llm_request = LlmRequest {
            model: self.strong_model.clone(),
            system_prompt: "You are an analysis planning assistant. Respond with JSON only.".to_string(),
            user_prompt: prompt,
            max_tokens: 4096,
            allow_thinking: false,
        };

        let response = self.llm.call(&llm_request).await.map_err(PlanError::Llm)?;
        let phases = match parse_phases(&response.content) {
            Ok(phases) => phases,
            Err(_) => {
                tracing::warn!("adaptive planner returned unparseable JSON, falling back to fixed plan");
                return self.plan_fixed(request).await;
            }
        };

        for phase in &phases {
            phase.validate().map_err(PlanError::Invalid)?;
        }

        Ok(WorkflowExecutionPlan {
            plan_id: Uuid::new_v4().to_string(),
            research_question: request.research_question.clone(),
            target_works: request.target_works.clone(),
            phases,
            chains: self.registries.chains().to_vec(),
            view_recommendations: Vec::new(),
            created_at: Utc::now(),
        })
    }
}
