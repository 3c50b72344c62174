//! Dispatches a single phase's execution according to its iteration mode:
//! one pass over the whole corpus (`Standard`), one pass per target work
//! (`PerWork`), or one pass per detected chapter (`ChapterTargeted`).
//!
//! Per-work and chapter-targeted dispatch run concurrently, bounded by a
//! semaphore sized from `per_work_concurrency` — mirrors the worker-pool
//! shape the teacher used for its own parallel dispatch, generalized to
//! this domain's unit of work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::warn;

use analyst_common::documents::Document;
use analyst_common::model::{EngineCallResult, PhaseResult, PhaseStatus};
use analyst_common::plan::{IterationMode, PhaseExecutionSpec, PhaseTarget, TargetWork};
use analyst_common::registry::ChapterInfo;

use crate::chain_runner::ChainRunner;
use crate::chapter_splitter::split_document;
use crate::context_broker::{assemble_cross_phase, truncate_for_work};
use crate::errors::PhaseError;
use crate::execution_context::ExecutionContext;
use crate::llm::{EngineRunner, LlmClient};
use crate::registries::Registries;

/// Per-work context variant, keyed off the phase name per spec.md §4.7:
/// the classification variant balances distilled and raw text, the
/// scanning variant puts the prior work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PerWorkVariant {
    Classification,
    Scanning,
}

fn per_work_variant_for_phase(phase_name: &str) -> PerWorkVariant {
    if phase_name.to_lowercase().contains("scan") {
        PerWorkVariant::Scanning
    } else {
        PerWorkVariant::Classification
    }
}

const MISSING_DOCUMENT_PLACEHOLDER: &str = "[document unavailable for this work item]";

pub struct PhaseRunner<'a> {
    registries: &'a Registries,
    llm: &'a LlmClient,
    ctx: ExecutionContext<'a>,
    per_work_semaphore: Arc<Semaphore>,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(
        registries: &'a Registries,
        llm: &'a LlmClient,
        ctx: ExecutionContext<'a>,
        per_work_concurrency: usize,
    ) -> Self {
        Self {
            registries,
            llm,
            ctx,
            per_work_semaphore: Arc::new(Semaphore::new(per_work_concurrency.max(1))),
        }
    }

    pub async fn run(
        &self,
        phase: &PhaseExecutionSpec,
        documents: &[Document],
        target_works: &[TargetWork],
        upstream: &[(&str, &PhaseResult)],
    ) -> Result<PhaseResult, PhaseError> {
        let started = Instant::now();
        let upstream_context = assemble_cross_phase(upstream);
        let upstream_context = match &phase.context_emphasis {
            Some(emphasis) => format!("{upstream_context}\n\nEmphasize: {emphasis}"),
            None => upstream_context,
        };

        let mut result = match phase.iteration_mode {
            IterationMode::Standard => self.run_standard(phase, documents, &upstream_context).await?,
            IterationMode::PerWork => self.run_per_work(phase, documents, target_works, &upstream_context).await?,
            IterationMode::ChapterTargeted => {
                self.run_chapter_targeted(phase, documents, &upstream_context).await?
            }
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn run_standard(
        &self,
        phase: &PhaseExecutionSpec,
        documents: &[Document],
        upstream_context: &str,
    ) -> Result<PhaseResult, PhaseError> {
        let corpus = documents.iter().map(|d| d.content.as_str()).collect::<Vec<_>>().join("\n\n");
        let context = format!("{upstream_context}\n\n{corpus}");

        let (mut results, primary_output) = self
            .dispatch_target(phase, &phase.target, phase.model_hint.as_deref(), &context, "primary")
            .await?;

        let mut final_sections = vec![primary_output.clone()];
        for chain_key in &phase.supplementary_chains {
            let Some(chain) = self.registries.chain(chain_key) else {
                warn!(chain_key, phase = phase.phase_number, "supplementary chain not found, skipping");
                continue;
            };
            let chain_context = format!("{context}\n\n## Primary output\n{primary_output}");
            let chain_runner = ChainRunner::new(self.registries, self.llm);
            match chain_runner.run(phase, chain, &chain_context, "primary", &self.ctx).await {
                Ok(outcome) => {
                    final_sections.push(format!("=== Supplementary: {chain_key} ===\n{}", outcome.final_output));
                    results.extend(outcome.results);
                }
                Err(err) => {
                    warn!(chain_key, phase = phase.phase_number, error = %err, "supplementary chain failed, continuing without it");
                }
            }
        }

        let mut engine_results: HashMap<String, Vec<EngineCallResult>> = HashMap::new();
        for r in results {
            engine_results.entry(r.engine_key.clone()).or_default().push(r);
        }
        let total_tokens = engine_results
            .values()
            .flatten()
            .map(|c| (c.input_tokens + c.output_tokens) as u64)
            .sum();

        Ok(PhaseResult {
            phase_number: phase.phase_number,
            phase_name: phase.phase_name.clone(),
            status: PhaseStatus::Completed,
            engine_results,
            work_results: None,
            work_errors: HashMap::new(),
            final_output: final_sections.join("\n\n"),
            duration_ms: 0,
            total_tokens,
            error: None,
        })
    }

    async fn run_per_work(
        &self,
        phase: &PhaseExecutionSpec,
        documents: &[Document],
        target_works: &[TargetWork],
        upstream_context: &str,
    ) -> Result<PhaseResult, PhaseError> {
        if target_works.is_empty() {
            return Err(PhaseError::InvalidTarget {
                phase: phase.phase_number,
                message: "per-work iteration mode requires at least one target work".to_string(),
            });
        }

        let variant = per_work_variant_for_phase(&phase.phase_name);

        let mut handles = Vec::with_capacity(target_works.len());
        for (index, work) in target_works.iter().enumerate() {
            let permit = Arc::clone(&self.per_work_semaphore);
            let work = work.clone();
            let doc_content = work
                .document_id
                .as_ref()
                .and_then(|id| documents.iter().find(|d| &d.document_id == id))
                .map(|d| d.content.clone())
                .unwrap_or_else(|| MISSING_DOCUMENT_PLACEHOLDER.to_string());
            let prior_raw = if index > 0 {
                target_works[index - 1]
                    .document_id
                    .as_ref()
                    .and_then(|id| documents.iter().find(|d| &d.document_id == id))
                    .map(|d| d.content.clone())
            } else {
                None
            };

            let context = truncate_for_work(&build_per_work_context(
                variant,
                upstream_context,
                &doc_content,
                prior_raw.as_deref(),
            ));

            let override_engine = phase.per_work_overrides.iter().find(|o| o.work_key == work.work_key);
            let chain_override = phase.per_work_chain_map.get(&work.work_key).cloned();

            let target = resolve_work_target(&phase.target, override_engine, chain_override.as_deref());
            let model_hint = phase.model_hint.clone();
            let phase_spec = phase.clone();

            let registries = self.registries;
            let llm = self.llm;
            let ctx = self.ctx;
            handles.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                let outcome = dispatch_target_static(
                    registries,
                    llm,
                    &ctx,
                    &phase_spec,
                    &target,
                    model_hint.as_deref(),
                    &context,
                    &work.work_key,
                )
                .await;
                (work.work_key.clone(), outcome)
            });
        }

        let outcomes = futures::future::join_all(handles).await;

        let mut work_results: HashMap<String, HashMap<String, Vec<EngineCallResult>>> = HashMap::new();
        let mut work_errors = HashMap::new();
        let mut final_sections = Vec::new();
        let mut total_tokens = 0u64;

        for (work_key, outcome) in outcomes {
            match outcome {
                Ok((results, final_output)) => {
                    let mut by_engine: HashMap<String, Vec<EngineCallResult>> = HashMap::new();
                    for r in results {
                        total_tokens += (r.input_tokens + r.output_tokens) as u64;
                        by_engine.entry(r.engine_key.clone()).or_default().push(r);
                    }
                    final_sections.push(format!("=== {work_key} ===\n{final_output}"));
                    work_results.insert(work_key, by_engine);
                }
                Err(err) => {
                    work_errors.insert(work_key, err.to_string());
                }
            }
        }

        let status = if work_results.is_empty() && !work_errors.is_empty() {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Completed
        };

        Ok(PhaseResult {
            phase_number: phase.phase_number,
            phase_name: phase.phase_name.clone(),
            status,
            engine_results: HashMap::new(),
            work_results: Some(work_results),
            work_errors,
            final_output: final_sections.join("\n\n"),
            duration_ms: 0,
            total_tokens,
            error: None,
        })
    }

    async fn run_chapter_targeted(
        &self,
        phase: &PhaseExecutionSpec,
        documents: &[Document],
        upstream_context: &str,
    ) -> Result<PhaseResult, PhaseError> {
        let Some(document) = documents.first() else {
            return Err(PhaseError::InvalidTarget {
                phase: phase.phase_number,
                message: "chapter-targeted iteration mode requires at least one document".to_string(),
            });
        };

        let structure = split_document(&document.document_id, &document.content);
        if structure.chapters.is_empty() {
            return Err(PhaseError::InvalidTarget {
                phase: phase.phase_number,
                message: "chapter splitter produced no chapters".to_string(),
            });
        }

        let chapters: Vec<ChapterInfo> = if phase.chapter_targets.is_empty() {
            structure.chapters.clone()
        } else {
            let filtered: Vec<ChapterInfo> = structure
                .chapters
                .iter()
                .filter(|c| {
                    phase.chapter_targets.iter().any(|t| t == &c.title || t == &c.index.to_string())
                })
                .cloned()
                .collect();
            if filtered.is_empty() {
                structure.chapters.clone()
            } else {
                filtered
            }
        };

        let mut handles = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let permit = Arc::clone(&self.per_work_semaphore);
            let chapter_text = resolve_chapter_text(documents, document, &chapter);
            let context = truncate_for_work(&format!("{upstream_context}\n\n{chapter_text}"));
            let target = phase.target.clone();
            let model_hint = phase.model_hint.clone();
            let phase_spec = phase.clone();
            let registries = self.registries;
            let llm = self.llm;
            let ctx = self.ctx;

            handles.push(async move {
                let work_key = chapter_work_key(&chapter);
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                let outcome = dispatch_target_static(
                    registries,
                    llm,
                    &ctx,
                    &phase_spec,
                    &target,
                    model_hint.as_deref(),
                    &context,
                    &work_key,
                )
                .await;
                (chapter, outcome)
            });
        }

        let outcomes = futures::future::join_all(handles).await;

        let mut work_results: HashMap<String, HashMap<String, Vec<EngineCallResult>>> = HashMap::new();
        let mut work_errors = HashMap::new();
        let mut final_sections = Vec::new();
        let mut total_tokens = 0u64;

        for (chapter, outcome) in outcomes {
            let work_key = chapter_work_key(&chapter);
            match outcome {
                Ok((results, final_output)) => {
                    let mut by_engine: HashMap<String, Vec<EngineCallResult>> = HashMap::new();
                    for r in results {
                        total_tokens += (r.input_tokens + r.output_tokens) as u64;
                        by_engine.entry(r.engine_key.clone()).or_default().push(r);
                    }
                    final_sections.push(format!("=== {} ===\n{final_output}", chapter.title));
                    work_results.insert(work_key, by_engine);
                }
                Err(err) => {
                    work_errors.insert(work_key, err.to_string());
                }
            }
        }

        Ok(PhaseResult {
            phase_number: phase.phase_number,
            phase_name: phase.phase_name.clone(),
            status: PhaseStatus::Completed,
            engine_results: HashMap::new(),
            work_results: Some(work_results),
            work_errors,
            final_output: final_sections.join("\n\n"),
            duration_ms: 0,
            total_tokens,
            error: None,
        })
    }

    async fn dispatch_target(
        &self,
        phase: &PhaseExecutionSpec,
        target: &PhaseTarget,
        model_hint: Option<&str>,
        context: &str,
        work_key: &str,
    ) -> Result<(Vec<EngineCallResult>, String), PhaseError> {
        dispatch_target_static(self.registries, self.llm, &self.ctx, phase, target, model_hint, context, work_key).await
    }
}

fn chapter_work_key(chapter: &ChapterInfo) -> String {
    format!("chapter-{}", chapter.index)
}

/// Pre-uploaded chapter document (matched by title) takes priority over
/// offset-based extraction from the primary document, which in turn takes
/// priority over falling back to the primary document's full text when the
/// detected offsets don't line up with its current content.
fn resolve_chapter_text(documents: &[Document], primary: &Document, chapter: &ChapterInfo) -> String {
    if let Some(doc) = documents.iter().find(|d| d.document_id != primary.document_id && d.title == chapter.title) {
        return doc.content.clone();
    }
    if chapter.start_offset < chapter.end_offset && chapter.end_offset <= primary.content.len() {
        return primary.content[chapter.start_offset..chapter.end_offset].to_string();
    }
    primary.content.clone()
}

/// Builds the per-work prompt context, combining the distilled upstream
/// analysis (when available) with the prior work's raw text. The
/// classification variant puts the current target first; the scanning
/// variant puts the prior work first. When a non-empty distilled summary
/// is available in `upstream_context`, it substitutes the raw target text
/// entirely rather than sending both.
fn build_per_work_context(
    variant: PerWorkVariant,
    upstream_context: &str,
    doc_content: &str,
    prior_raw: Option<&str>,
) -> String {
    let distilled_available = !upstream_context.trim().is_empty();
    let target_section = if distilled_available {
        format!("=== Distilled upstream analysis ===\n{}", upstream_context.trim())
    } else {
        format!("=== Target work ===\n{doc_content}")
    };
    let prior_section = prior_raw.map(|p| format!("=== Prior work ===\n{p}"));

    match (variant, prior_section) {
        (PerWorkVariant::Scanning, Some(prior)) => format!("{prior}\n\n{target_section}"),
        (PerWorkVariant::Classification, Some(prior)) => format!("{target_section}\n\n{prior}"),
        (_, None) => target_section,
    }
}

fn resolve_work_target(
    default_target: &PhaseTarget,
    override_spec: Option<&analyst_common::plan::PerWorkOverride>,
    chain_override: Option<&str>,
) -> PhaseTarget {
    if let Some(chain_key) = chain_override {
        return PhaseTarget::Chain { chain_key: chain_key.to_string() };
    }
    if let Some(o) = override_spec {
        if let Some(chain_key) = &o.chain_key {
            return PhaseTarget::Chain { chain_key: chain_key.clone() };
        }
        if let Some(engine_key) = &o.engine_key {
            // 0 is an unset sentinel, resolved against the phase's depth
            // overrides (or the engine's own default) at dispatch time.
            return PhaseTarget::Engine { engine_key: engine_key.clone(), passes: 0 };
        }
    }
    default_target.clone()
}

async fn dispatch_target_static(
    registries: &Registries,
    llm: &LlmClient,
    ctx: &ExecutionContext<'_>,
    phase: &PhaseExecutionSpec,
    target: &PhaseTarget,
    model_hint: Option<&str>,
    context: &str,
    work_key: &str,
) -> Result<(Vec<EngineCallResult>, String), PhaseError> {
    match target {
        PhaseTarget::Engine { engine_key, passes } => {
            let engine = registries.engine(engine_key).ok_or_else(|| PhaseError::InvalidTarget {
                phase: phase.phase_number,
                message: format!("phase references unknown engine '{engine_key}'"),
            })?;
            let fallback = if *passes == 0 { engine.default_passes.max(1) } else { *passes };
            let resolved_passes = phase.depth_for_engine(engine_key, fallback);
            let runner = EngineRunner::new(llm, ctx.db, ctx.job_id);
            let outcome = runner
                .run_passes(engine, None, model_hint, context, resolved_passes, phase.phase_number, work_key, ctx.resume_watermark)
                .await?;
            Ok((outcome.results, outcome.combined_content))
        }
        PhaseTarget::Chain { chain_key } => {
            let chain = registries.chain(chain_key).ok_or_else(|| PhaseError::InvalidTarget {
                phase: phase.phase_number,
                message: format!("phase references unknown chain '{chain_key}'"),
            })?;
            let chain_runner = ChainRunner::new(registries, llm);
            let outcome = chain_runner.run(phase, chain, context, work_key, ctx).await?;
            Ok((outcome.results, outcome.final_output))
        }
    }
}
