//! Executes a named chain: a sequence of engine invocations, optionally
//! blended. Only `BlendMode::Sequential` is genuinely implemented — the
//! other three modes fall back to sequential execution with a warning
//! (spec.md open question on blend-mode scope, resolved in DESIGN.md).

use analyst_common::model::EngineCallResult;
use analyst_common::plan::{BlendMode, ChainDefinition, PhaseExecutionSpec};

use crate::context_broker::assemble_chain_step;
use crate::errors::PhaseError;
use crate::execution_context::ExecutionContext;
use crate::llm::{EngineRunner, LlmClient};
use crate::registries::Registries;

pub struct ChainOutcome {
    pub results: Vec<EngineCallResult>,
    pub final_output: String,
}

pub struct ChainRunner<'a> {
    registries: &'a Registries,
    llm: &'a LlmClient,
}

impl<'a> ChainRunner<'a> {
    pub fn new(registries: &'a Registries, llm: &'a LlmClient) -> Self {
        Self { registries, llm }
    }

    pub async fn run(
        &self,
        phase: &PhaseExecutionSpec,
        chain: &ChainDefinition,
        initial_context: &str,
        work_key: &str,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ChainOutcome, PhaseError> {
        match chain.blend_mode {
            BlendMode::Sequential => self.run_sequential(phase, chain, initial_context, work_key, ctx).await,
            other => {
                tracing::warn!(
                    chain_key = %chain.chain_key,
                    blend_mode = ?other,
                    "blend mode not yet implemented, falling back to sequential execution"
                );
                self.run_sequential(phase, chain, initial_context, work_key, ctx).await
            }
        }
    }

    /// Unknown engine references are logged and skipped: downstream steps
    /// still run. An unknown stance falls back to running the step
    /// unstanced rather than dropping the whole step.
    async fn run_sequential(
        &self,
        phase: &PhaseExecutionSpec,
        chain: &ChainDefinition,
        initial_context: &str,
        work_key: &str,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ChainOutcome, PhaseError> {
        let runner = EngineRunner::new(self.llm, ctx.db, ctx.job_id);
        let mut all_results = Vec::new();
        let mut completed_steps: Vec<(String, String)> = Vec::new();
        let mut last_output = String::new();

        for step in &chain.steps {
            let Some(engine) = self.registries.engine(&step.engine_key) else {
                tracing::warn!(
                    chain_key = %chain.chain_key,
                    engine_key = %step.engine_key,
                    "chain step references unknown engine, skipping step"
                );
                continue;
            };

            let stance = match &step.stance_key {
                Some(key) => match self.registries.stance(key) {
                    Some(stance) => Some(stance),
                    None => {
                        tracing::warn!(
                            chain_key = %chain.chain_key,
                            stance_key = %key,
                            "chain step references unknown stance, running unstanced"
                        );
                        None
                    }
                },
                None => None,
            };

            let prior_context = assemble_chain_step(
                &completed_steps.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Vec<_>>(),
            );
            let context = if prior_context.is_empty() {
                initial_context.to_string()
            } else {
                format!("{initial_context}\n\n{prior_context}")
            };

            let passes = phase.depth_for_engine(&step.engine_key, engine.default_passes.max(1));
            let outcome = runner
                .run_passes(engine, stance, None, &context, passes, phase.phase_number, work_key, ctx.resume_watermark)
                .await?;
            last_output = outcome.combined_content.clone();
            completed_steps.push((step.engine_key.clone(), outcome.combined_content));
            all_results.extend(outcome.results);
        }

        Ok(ChainOutcome { results: all_results, final_output: last_output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use analyst_common::plan::{ChainStep, IterationMode, PhaseTarget};
    use analyst_common::registry::{CapabilityEngine, Stance};

    use crate::db::Database;
    use crate::execution_context::ResumeWatermark;
    use crate::registries::CatalogFile;

    fn sample_catalog() -> CatalogFile {
        CatalogFile {
            engines: vec![CapabilityEngine {
                engine_key: "skeptic".into(),
                display_name: "Skeptic".into(),
                system_prompt: "Be skeptical.".into(),
                default_model: "claude-sonnet-4".into(),
                supports_thinking: false,
                default_passes: 1,
            }],
            stances: vec![Stance {
                stance_key: "devil".into(),
                description: "Argue the opposite.".into(),
                prompt_fragment: "Play devil's advocate.".into(),
            }],
            chains: vec![ChainDefinition {
                chain_key: "ghost-only".into(),
                steps: vec![ChainStep {
                    engine_key: "ghost".into(),
                    stance_key: Some("missing-stance".into()),
                    role: None,
                }],
                blend_mode: Default::default(),
            }],
            views: vec![],
            default_workflow: vec![],
        }
    }

    fn sample_phase() -> PhaseExecutionSpec {
        PhaseExecutionSpec {
            phase_number: 1.0,
            phase_name: "Skepticism".into(),
            target: PhaseTarget::Chain { chain_key: "ghost-only".into() },
            iteration_mode: IterationMode::Standard,
            depends_on: vec![],
            model_hint: None,
            requires_full_documents: false,
            per_work_overrides: vec![],
            supplementary_chains: vec![],
            max_context_chars_override: None,
            per_work_chain_map: HashMap::new(),
            skip: false,
            skip_reason: None,
            default_depth: None,
            engine_depth_overrides: HashMap::new(),
            chapter_targets: vec![],
            context_emphasis: None,
            rationale: None,
        }
    }

    #[tokio::test]
    async fn unknown_engine_reference_is_skipped_not_fatal() {
        let registries = Registries::from_catalog(sample_catalog());
        let llm = LlmClient::new("key", "https://api.anthropic.com").unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = analyst_common::model::Job::new("job-1".into(), "plan-1".into(), "tok".into());
        db.insert_job(&job).unwrap();
        let watermark: ResumeWatermark = Default::default();
        let ctx = ExecutionContext { db: &db, job_id: "job-1", resume_watermark: &watermark };

        let runner = ChainRunner::new(&registries, &llm);
        let phase = sample_phase();
        let chain = registries.chain("ghost-only").unwrap();

        // Every step in this chain references an unknown engine, so the
        // loop skips past it without making any LLM call and still
        // completes instead of hard-erroring on the unknown reference.
        let outcome = runner.run(&phase, chain, "context", "doc-a", &ctx).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.final_output, "");
    }
}
