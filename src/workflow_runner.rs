//! Drives a plan's phases to completion: computes dependency waves,
//! dispatches each phase through `PhaseRunner`, persists results as they
//! land, and updates job progress after each phase. Concurrency within a
//! wave is bounded by `dependency_group_concurrency`, mirroring the
//! teacher's wave-based worker pool shape (`dag/executor.rs`) generalized
//! from file-change dispatch to phase dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use analyst_common::documents::Document;
use analyst_common::model::{JobProgress, PhaseResult, PhaseStatus};
use analyst_common::plan::{PhaseExecutionSpec, WorkflowExecutionPlan};

use crate::dag::DagScheduler;
use crate::db::Database;
use crate::errors::WorkflowError;
use crate::execution_context::ExecutionContext;
use crate::llm::LlmClient;
use crate::phase_runner::PhaseRunner;
use crate::registries::Registries;

pub struct WorkflowRunner<'a> {
    registries: &'a Registries,
    llm: &'a LlmClient,
    db: &'a Database,
    dependency_group_concurrency: usize,
    per_work_concurrency: usize,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(
        registries: &'a Registries,
        llm: &'a LlmClient,
        db: &'a Database,
        dependency_group_concurrency: usize,
        per_work_concurrency: usize,
    ) -> Self {
        Self {
            registries,
            llm,
            db,
            dependency_group_concurrency,
            per_work_concurrency,
        }
    }

    /// Runs every phase in the plan to completion (or failure). Resume
    /// semantics: the output store is consulted up front for every pass
    /// already persisted for `job_id`, and `PhaseRunner`/`ChainRunner`/
    /// `EngineRunner` skip those on the way back down instead of
    /// recomputing them. Terminal status follows the plan's priority:
    /// failed phases make the job `failed` (with a summary of which phase
    /// numbers); otherwise it's `completed`. Cancellation is surfaced by
    /// the caller checking the job's status between waves, not by this
    /// method, since the job manager owns the cancel flag.
    pub async fn run(
        &self,
        job_id: &str,
        plan: &WorkflowExecutionPlan,
        documents: &[Document],
    ) -> Result<(), WorkflowError> {
        if plan.phases.is_empty() {
            return Ok(());
        }

        let resume_watermark = self.db.get_completed_passes(job_id).map_err(WorkflowError::Other)?;
        let ctx = ExecutionContext { db: self.db, job_id, resume_watermark: &resume_watermark };

        let mut completed: HashMap<String, PhaseResult> = HashMap::new();
        let mut failed_phase_numbers: Vec<f64> = Vec::new();
        let total_phases = plan.phases.len() as u32;

        // Active phases (not skipped) are what gets topologically sorted;
        // a dependency on a skipped phase is dropped from the graph so the
        // builder doesn't treat it as an unknown-phase error.
        let skipped_labels: HashSet<String> =
            plan.phases.iter().filter(|p| p.skip).map(|p| format_phase_number(p.phase_number)).collect();
        let active_phases: Vec<PhaseExecutionSpec> = plan
            .phases
            .iter()
            .filter(|p| !p.skip)
            .cloned()
            .map(|mut p| {
                p.depends_on.retain(|d| !skipped_labels.contains(&format_phase_number(*d)));
                p
            })
            .collect();

        for phase in plan.phases.iter().filter(|p| p.skip) {
            let label = format_phase_number(phase.phase_number);
            let result = PhaseResult {
                phase_number: phase.phase_number,
                phase_name: phase.phase_name.clone(),
                status: PhaseStatus::Skipped,
                engine_results: HashMap::new(),
                work_results: None,
                work_errors: HashMap::new(),
                final_output: phase.skip_reason.clone().unwrap_or_default(),
                duration_ms: 0,
                total_tokens: 0,
                error: None,
            };
            self.db.record_phase_result(job_id, &result).map_err(WorkflowError::Other)?;
            completed.insert(label, result);
        }

        let scheduler = DagScheduler::from_phases(&active_phases).map_err(WorkflowError::Other)?;
        let waves = scheduler.compute_waves();
        let wave_semaphore = Arc::new(Semaphore::new(self.dependency_group_concurrency.max(1)));
        let phase_runner = PhaseRunner::new(self.registries, self.llm, ctx, self.per_work_concurrency);

        for wave in waves {
            let mut handles = Vec::with_capacity(wave.len());
            for index in wave {
                let Some(phase) = scheduler.nodes().get(index).map(|n| n.phase.clone()) else { continue };
                let permit = Arc::clone(&wave_semaphore);
                let upstream: Vec<(String, PhaseResult)> = phase
                    .depends_on
                    .iter()
                    .filter_map(|dep| {
                        let label = format_phase_number(*dep);
                        completed.get(&label).map(|r| (label, r.clone()))
                    })
                    .collect();
                let target_works = plan.target_works.clone();
                let phase_runner = &phase_runner;

                handles.push(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore closed");
                    let upstream_refs: Vec<(&str, &PhaseResult)> =
                        upstream.iter().map(|(label, r)| (label.as_str(), r)).collect();
                    let result = phase_runner.run(&phase, documents, &target_works, &upstream_refs).await;
                    (phase, result)
                });
            }

            let outcomes = futures::future::join_all(handles).await;
            for (phase, outcome) in outcomes {
                let label = format_phase_number(phase.phase_number);
                let result = match outcome {
                    Ok(result) => result,
                    Err(err) => PhaseResult::failure(phase.phase_number, &phase.phase_name, err.to_string()),
                };

                if result.status == PhaseStatus::Failed {
                    failed_phase_numbers.push(phase.phase_number);
                }

                self.db.record_phase_result(job_id, &result).map_err(WorkflowError::Other)?;

                let mut progress = JobProgress {
                    current_phase: phase.phase_number,
                    total_phases,
                    phase_name: phase.phase_name.clone(),
                    detail: match result.status {
                        PhaseStatus::Completed => "phase completed".to_string(),
                        PhaseStatus::Failed => result.error.clone().unwrap_or_default(),
                        _ => "phase in progress".to_string(),
                    },
                    completed_phases: completed.keys().cloned().collect(),
                    phase_statuses: HashMap::new(),
                    structured_detail: None,
                };
                progress.completed_phases.push(label.clone());
                self.db.update_job_progress(job_id, &progress).map_err(WorkflowError::Other)?;

                completed.insert(label, result);
            }
        }

        if !failed_phase_numbers.is_empty() {
            failed_phase_numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let summary =
                failed_phase_numbers.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ");
            return Err(WorkflowError::Other(anyhow::anyhow!("phase(s) failed: {summary}")));
        }

        Ok(())
    }
}

fn format_phase_number(n: f64) -> String {
    n.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    use analyst_common::plan::{IterationMode, PhaseTarget, TargetWork};
    use chrono::Utc;

    use crate::registries::CatalogFile;

    fn phase(number: f64, deps: Vec<f64>, skip: bool) -> PhaseExecutionSpec {
        PhaseExecutionSpec {
            phase_number: number,
            phase_name: format!("Phase {number}"),
            target: PhaseTarget::Engine { engine_key: "skeptic".into(), passes: 1 },
            iteration_mode: IterationMode::Standard,
            depends_on: deps,
            model_hint: None,
            requires_full_documents: false,
            per_work_overrides: vec![],
            supplementary_chains: vec![],
            max_context_chars_override: None,
            per_work_chain_map: StdHashMap::new(),
            skip,
            skip_reason: if skip { Some("not needed for this run".into()) } else { None },
            default_depth: None,
            engine_depth_overrides: StdHashMap::new(),
            chapter_targets: vec![],
            context_emphasis: None,
            rationale: None,
        }
    }

    fn plan(phases: Vec<PhaseExecutionSpec>) -> WorkflowExecutionPlan {
        WorkflowExecutionPlan {
            plan_id: "plan-1".into(),
            research_question: "q".into(),
            target_works: vec![TargetWork { work_key: "doc-a".into(), title: "Doc A".into(), document_id: None }],
            phases,
            chains: vec![],
            view_recommendations: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_plan_is_a_no_op() {
        let registries = Registries::from_catalog(CatalogFile::default());
        let llm = LlmClient::new("key", "https://api.anthropic.com").unwrap();
        let db = Database::open_in_memory().unwrap();
        let runner = WorkflowRunner::new(&registries, &llm, &db, 2, 2);
        let empty_plan = plan(vec![]);
        let result = runner.run("job-1", &empty_plan, &[]).await;
        assert!(result.is_ok());
    }

    #[test]
    fn skipped_phase_is_stripped_from_the_dependency_graph() {
        // Phase 2 is skipped and phase 3 depends on it; the active-phase
        // graph should build without an unknown-dependency error even
        // though phase 2 never appears in it.
        let phases = vec![phase(1.0, vec![], false), phase(2.0, vec![1.0], true), phase(3.0, vec![2.0], false)];
        let skipped_labels: HashSet<String> =
            phases.iter().filter(|p| p.skip).map(|p| format_phase_number(p.phase_number)).collect();
        let active: Vec<PhaseExecutionSpec> = phases
            .iter()
            .filter(|p| !p.skip)
            .cloned()
            .map(|mut p| {
                p.depends_on.retain(|d| !skipped_labels.contains(&format_phase_number(*d)));
                p
            })
            .collect();
        let scheduler = DagScheduler::from_phases(&active);
        assert!(scheduler.is_ok());
    }
}
