//! Runs one engine for its configured number of passes, turning each LLM
//! response into an `EngineCallResult`.

use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use analyst_common::model::{EngineCallResult, PhaseOutput};
use analyst_common::registry::{CapabilityEngine, Stance};

use crate::context_broker::assemble_inner_pass;
use crate::db::Database;
use crate::errors::LlmError;
use crate::execution_context::ResumeWatermark;
use crate::llm::{LlmClient, LlmRequest};
use crate::prompt::PromptComposer;

pub struct PassOutcome {
    pub results: Vec<EngineCallResult>,
    pub combined_content: String,
}

pub struct EngineRunner<'a> {
    client: &'a LlmClient,
    db: &'a Database,
    job_id: &'a str,
}

impl<'a> EngineRunner<'a> {
    pub fn new(client: &'a LlmClient, db: &'a Database, job_id: &'a str) -> Self {
        Self { client, db, job_id }
    }

    /// Runs `passes` sequential calls against `engine`, threading every
    /// prior pass's prose (not just the last one) into the next pass's user
    /// prompt via the context broker's inner-pass assembly. A pass already
    /// recorded in `resume_watermark` is skipped: its stored content is
    /// reused for downstream threading and the combined result, and no LLM
    /// call is made for it.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_passes(
        &self,
        engine: &CapabilityEngine,
        stance: Option<&Stance>,
        model_hint: Option<&str>,
        context: &str,
        passes: u32,
        phase_number: f64,
        work_key: &str,
        resume_watermark: &ResumeWatermark,
    ) -> Result<PassOutcome, LlmError> {
        let model = model_hint.unwrap_or(&engine.default_model).to_string();
        let system_prompt = PromptComposer::system_prompt(engine, stance);
        let stance_key = stance.map(|s| s.stance_key.clone()).unwrap_or_default();

        let existing = self.db.get_outputs_for_phase(self.job_id, phase_number).unwrap_or_default();

        let mut results = Vec::with_capacity(passes.max(1) as usize);
        let mut pass_contents: Vec<String> = Vec::new();

        for pass_number in 1..=passes.max(1) {
            let already_done = resume_watermark.contains(&(
                format!("{phase_number}"),
                engine.engine_key.clone(),
                pass_number as i64,
                work_key.to_string(),
            ));

            if already_done {
                if let Some(prior) = existing.iter().find(|o| {
                    o.engine_key == engine.engine_key && o.pass_number == pass_number && o.work_key == work_key
                }) {
                    pass_contents.push(prior.content.clone());
                    results.push(EngineCallResult {
                        engine_key: engine.engine_key.clone(),
                        pass_number,
                        stance_key: stance.map(|s| s.stance_key.clone()),
                        content: prior.content.clone(),
                        model_used: prior.model_used.clone(),
                        input_tokens: prior.input_tokens,
                        output_tokens: prior.output_tokens,
                        thinking_tokens: 0,
                        duration_ms: 0,
                        retries: 0,
                    });
                    continue;
                }
            }

            let inner_context =
                assemble_inner_pass(&pass_contents.iter().map(|s| s.as_str()).collect::<Vec<_>>());
            let user_prompt = if inner_context.is_empty() {
                context.to_string()
            } else {
                format!(
                    "{context}\n\n---\n{inner_context}\n\nRefine or extend this in light of the above context."
                )
            };

            let request = LlmRequest {
                model: model.clone(),
                system_prompt: system_prompt.clone(),
                user_prompt,
                max_tokens: 8192,
                allow_thinking: engine.supports_thinking,
            };

            let started = Instant::now();
            let response = self.client.call(&request).await?;
            let duration_ms = started.elapsed().as_millis() as u64;

            pass_contents.push(response.content.clone());

            let output = PhaseOutput {
                id: Uuid::new_v4().to_string(),
                job_id: self.job_id.to_string(),
                phase_number,
                engine_key: engine.engine_key.clone(),
                pass_number,
                work_key: work_key.to_string(),
                stance_key: stance_key.clone(),
                role: "assistant".to_string(),
                content: response.content.clone(),
                model_used: response.model_used.clone(),
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                parent_id: None,
                metadata: serde_json::json!({}),
                created_at: chrono::Utc::now(),
            };
            if let Err(err) = self.db.insert_output(&output) {
                warn!(error = %err, engine_key = %engine.engine_key, pass_number, "failed to persist phase output");
            }

            results.push(EngineCallResult {
                engine_key: engine.engine_key.clone(),
                pass_number,
                stance_key: stance.map(|s| s.stance_key.clone()),
                content: response.content,
                model_used: response.model_used,
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                thinking_tokens: response.thinking_tokens,
                duration_ms,
                retries: response.retries,
            });
        }

        let combined_content = pass_contents.last().cloned().unwrap_or_default();
        Ok(PassOutcome { combined_content, results })
    }
}
