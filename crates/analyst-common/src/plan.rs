//! Execution plan and phase specification types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A work item the plan targets — a single document, or one of several under
/// a comparative analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetWork {
    pub work_key: String,
    pub title: String,
    #[serde(default)]
    pub document_id: Option<String>,
}

/// Prior analysis supplied alongside the corpus, carried through untouched
/// unless a phase explicitly asks to revise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorWork {
    pub source: String,
    pub content: String,
}

/// How a chain blends multiple engines' outputs together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Sequential,
    Parallel,
    Merge,
    LlmSelection,
}

impl Default for BlendMode {
    fn default() -> Self {
        BlendMode::Sequential
    }
}

/// One step of a named chain: run `engine_key`, optionally under a stance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub engine_key: String,
    #[serde(default)]
    pub stance_key: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A named, ordered sequence of engine invocations with a blend mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub chain_key: String,
    pub steps: Vec<ChainStep>,
    #[serde(default)]
    pub blend_mode: BlendMode,
}

/// How a phase iterates over the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    /// One execution, corpus-wide context.
    Standard,
    /// One execution per `TargetWork`.
    PerWork,
    /// One execution per detected chapter/section.
    ChapterTargeted,
}

impl Default for IterationMode {
    fn default() -> Self {
        IterationMode::Standard
    }
}

/// Either a single engine or a named chain drives a phase — never both, and
/// never neither; `PhaseExecutionSpec::validate` enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhaseTarget {
    Engine { engine_key: String, passes: u32 },
    Chain { chain_key: String },
}

/// A per-work override: a different target/engine/chain for one work item,
/// layered on top of the phase's default target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerWorkOverride {
    pub work_key: String,
    #[serde(default)]
    pub engine_key: Option<String>,
    #[serde(default)]
    pub chain_key: Option<String>,
}

/// One phase of the plan. Mirrors `PhaseExecutionSpec` from the original
/// orchestrator schema, including the Milestone 2/5/adaptive-planner fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecutionSpec {
    pub phase_number: f64,
    pub phase_name: String,
    pub target: PhaseTarget,
    #[serde(default)]
    pub iteration_mode: IterationMode,
    #[serde(default)]
    pub depends_on: Vec<f64>,
    #[serde(default)]
    pub model_hint: Option<String>,
    #[serde(default)]
    pub requires_full_documents: bool,
    #[serde(default)]
    pub per_work_overrides: Vec<PerWorkOverride>,
    #[serde(default)]
    pub supplementary_chains: Vec<String>,
    #[serde(default)]
    pub max_context_chars_override: Option<usize>,
    /// Only meaningful when `iteration_mode` is `PerWork`: routes specific
    /// work keys through a named chain instead of the phase default target.
    #[serde(default)]
    pub per_work_chain_map: HashMap<String, String>,
    /// When true the workflow runner excludes this phase from the dependency
    /// graph entirely; `skip_reason` is carried for diagnostics/UI only.
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
    /// Pass depth applied to every engine in this phase's target/chain unless
    /// overridden in `engine_depth_overrides`. `None` defers to the engine's
    /// own operationalization default.
    #[serde(default)]
    pub default_depth: Option<u32>,
    /// Per-engine pass-depth overrides, keyed by engine_key. Takes priority
    /// over `default_depth` for that engine only.
    #[serde(default)]
    pub engine_depth_overrides: HashMap<String, u32>,
    /// Non-empty only when `iteration_mode` is `ChapterTargeted`: the chapter
    /// ids this phase should run against. An empty list means "run chapter
    /// mode against every detected chapter".
    #[serde(default)]
    pub chapter_targets: Vec<String>,
    /// Free-form instruction injected into the context-broker's cross-phase
    /// block, telling the consuming phase what to emphasize from upstream.
    #[serde(default)]
    pub context_emphasis: Option<String>,
    /// Planner-authored justification for this phase's shape and target,
    /// carried for the decision trace; not consumed by execution.
    #[serde(default)]
    pub rationale: Option<String>,
}

impl PhaseExecutionSpec {
    /// A `Chain` target with a non-empty key, or an `Engine` target with a
    /// non-empty key and at least one pass, is well-formed.
    pub fn validate(&self) -> Result<(), String> {
        match &self.target {
            PhaseTarget::Engine { engine_key, passes } => {
                if engine_key.trim().is_empty() {
                    return Err(format!(
                        "phase {}: engine target has an empty engine_key",
                        self.phase_number
                    ));
                }
                if *passes == 0 {
                    return Err(format!(
                        "phase {}: engine target must run at least one pass",
                        self.phase_number
                    ));
                }
            }
            PhaseTarget::Chain { chain_key } => {
                if chain_key.trim().is_empty() {
                    return Err(format!(
                        "phase {}: chain target has an empty chain_key",
                        self.phase_number
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve the pass depth for one engine within this phase: a per-engine
    /// override wins, then the phase default, then the caller-supplied
    /// fallback (typically the target's own `passes` or the engine's
    /// registered operationalization default).
    pub fn depth_for_engine(&self, engine_key: &str, fallback: u32) -> u32 {
        self.engine_depth_overrides
            .get(engine_key)
            .copied()
            .or(self.default_depth)
            .unwrap_or(fallback)
    }
}

/// A recommended presentation view, attached to the plan by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRecommendation {
    pub view_key: String,
    pub title: String,
    #[serde(default)]
    pub source_phases: Vec<f64>,
}

/// Incoming request to synthesize a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorPlanRequest {
    pub research_question: String,
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub target_works: Vec<TargetWork>,
    #[serde(default)]
    pub prior_work: Vec<PriorWork>,
    #[serde(default)]
    pub workflow_key: Option<String>,
}

/// The synthesized plan: an ordered phase list plus the chain library a
/// phase's `Chain` target resolves against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionPlan {
    pub plan_id: String,
    pub research_question: String,
    pub target_works: Vec<TargetWork>,
    pub phases: Vec<PhaseExecutionSpec>,
    #[serde(default)]
    pub chains: Vec<ChainDefinition>,
    #[serde(default)]
    pub view_recommendations: Vec<ViewRecommendation>,
    pub created_at: DateTime<Utc>,
}

/// Alias kept for readability at call sites that just say "the plan".
pub type ExecutionPlan = WorkflowExecutionPlan;

impl WorkflowExecutionPlan {
    pub fn phase(&self, phase_number: f64) -> Option<&PhaseExecutionSpec> {
        self.phases
            .iter()
            .find(|p| (p.phase_number - phase_number).abs() < f64::EPSILON)
    }

    pub fn chain(&self, chain_key: &str) -> Option<&ChainDefinition> {
        self.chains.iter().find(|c| c.chain_key == chain_key)
    }
}

/// A refinement request against an assembled view, persisted per job+view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRefinement {
    pub job_id: String,
    pub view_key: String,
    pub instruction: String,
    pub refined_content: String,
    pub created_at: DateTime<Utc>,
}

/// A cached rewrite of an assembled view in a particular prose style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolishCacheEntry {
    pub job_id: String,
    pub view_key: String,
    pub style_school: String,
    pub polished_content: String,
    pub created_at: DateTime<Utc>,
}

/// A cached rendering of one section of one phase output, keyed by a hash of
/// the source content so staleness can be detected without recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationCacheEntry {
    pub output_id: String,
    pub section: String,
    pub content_hash: String,
    pub rendered: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_target_requires_nonempty_key_and_passes() {
        let spec = PhaseExecutionSpec {
            phase_number: 1.0,
            phase_name: "p".into(),
            target: PhaseTarget::Engine { engine_key: String::new(), passes: 1 },
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
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn chain_target_with_key_validates() {
        let spec = PhaseExecutionSpec {
            phase_number: 2.0,
            phase_name: "p".into(),
            target: PhaseTarget::Chain { chain_key: "default".into() },
            iteration_mode: IterationMode::PerWork,
            depends_on: vec![1.0],
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
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn plan_looks_up_phase_and_chain_by_key() {
        let plan = WorkflowExecutionPlan {
            plan_id: "plan-1".into(),
            research_question: "q".into(),
            target_works: vec![],
            phases: vec![PhaseExecutionSpec {
                phase_number: 1.5,
                phase_name: "p".into(),
                target: PhaseTarget::Engine { engine_key: "e".into(), passes: 1 },
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
            }],
            chains: vec![ChainDefinition {
                chain_key: "c1".into(),
                steps: vec![],
                blend_mode: BlendMode::Sequential,
            }],
            view_recommendations: vec![],
            created_at: Utc::now(),
        };
        assert!(plan.phase(1.5).is_some());
        assert!(plan.phase(9.9).is_none());
        assert!(plan.chain("c1").is_some());
    }

    #[test]
    fn blend_mode_defaults_to_sequential() {
        assert_eq!(BlendMode::default(), BlendMode::Sequential);
    }
}
