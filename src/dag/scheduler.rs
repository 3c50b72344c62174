//! Wave computation over a `PhaseGraph`, with graceful cycle fallback.

use std::collections::HashSet;

use tracing::warn;

use crate::dag::builder::{DagBuilder, PhaseGraph, PhaseIndex};
use analyst_common::plan::PhaseExecutionSpec;
use anyhow::Result;

/// Status of a phase node during workflow execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed { error: String },
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Skipped)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone)]
pub struct PhaseNode {
    pub phase: PhaseExecutionSpec,
    pub status: PhaseStatus,
    pub index: PhaseIndex,
}

/// Builds waves (groups of phases runnable in parallel) from a phase graph.
/// When the graph is cyclic, every wave has exactly one phase, in ascending
/// phase-number order — the documented graceful fallback.
pub struct DagScheduler {
    graph: PhaseGraph,
    nodes: Vec<PhaseNode>,
    completed: HashSet<PhaseIndex>,
    failed: HashSet<PhaseIndex>,
}

impl DagScheduler {
    pub fn from_phases(phases: &[PhaseExecutionSpec]) -> Result<Self> {
        let graph = DagBuilder::new(phases.to_vec()).build()?;
        if graph.is_cyclic() {
            let involved: Vec<f64> = graph.phases().iter().map(|p| p.phase_number).collect();
            warn!(phases = ?involved, "cycle detected in phase dependencies, falling back to sequential execution");
        }
        let nodes = graph
            .phases()
            .iter()
            .enumerate()
            .map(|(i, p)| PhaseNode { phase: p.clone(), status: PhaseStatus::Pending, index: i })
            .collect();
        Ok(Self { graph, nodes, completed: HashSet::new(), failed: HashSet::new() })
    }

    pub fn phase_count(&self) -> usize {
        self.graph.len()
    }

    pub fn nodes(&self) -> &[PhaseNode] {
        &self.nodes
    }

    pub fn is_cyclic(&self) -> bool {
        self.graph.is_cyclic()
    }

    /// Waves of phase indices runnable together. Sequential singleton waves
    /// if the graph is cyclic.
    pub fn compute_waves(&self) -> Vec<Vec<PhaseIndex>> {
        if self.graph.is_cyclic() {
            return self.graph.sequential_order().into_iter().map(|i| vec![i]).collect();
        }

        let mut waves = Vec::new();
        let mut completed: HashSet<PhaseIndex> = HashSet::new();
        loop {
            let ready: Vec<PhaseIndex> = (0..self.graph.len())
                .filter(|i| !completed.contains(i) && self.graph.dependencies_satisfied(*i, &completed))
                .collect();
            if ready.is_empty() {
                break;
            }
            for &i in &ready {
                completed.insert(i);
            }
            waves.push(ready);
        }
        waves
    }

    pub fn mark_running(&mut self, index: PhaseIndex) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.status = PhaseStatus::Running;
        }
    }

    pub fn mark_completed(&mut self, index: PhaseIndex) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.status = PhaseStatus::Completed;
        }
        self.completed.insert(index);
    }

    pub fn mark_failed(&mut self, index: PhaseIndex, error: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.status = PhaseStatus::Failed { error: error.into() };
        }
        self.failed.insert(index);
    }

    pub fn all_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::plan::{IterationMode, PhaseTarget};
    use std::collections::HashMap;

    fn phase(number: f64, deps: Vec<f64>) -> PhaseExecutionSpec {
        PhaseExecutionSpec {
            phase_number: number,
            phase_name: format!("Phase {number}"),
            target: PhaseTarget::Engine { engine_key: "e".into(), passes: 1 },
            iteration_mode: IterationMode::Standard,
            depends_on: deps,
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

    #[test]
    fn diamond_produces_three_waves() {
        let phases = vec![
            phase(1.0, vec![]),
            phase(2.0, vec![1.0]),
            phase(3.0, vec![1.0]),
            phase(4.0, vec![2.0, 3.0]),
        ];
        let scheduler = DagScheduler::from_phases(&phases).unwrap();
        let waves = scheduler.compute_waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec![0]);
        assert_eq!(waves[2], vec![3]);
    }

    #[test]
    fn cyclic_graph_falls_back_to_singleton_waves() {
        let phases = vec![phase(1.0, vec![2.0]), phase(2.0, vec![1.0])];
        let scheduler = DagScheduler::from_phases(&phases).unwrap();
        assert!(scheduler.is_cyclic());
        let waves = scheduler.compute_waves();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 1);
        assert_eq!(waves[1].len(), 1);
    }

    #[test]
    fn mark_completed_updates_status_and_count() {
        let phases = vec![phase(1.0, vec![])];
        let mut scheduler = DagScheduler::from_phases(&phases).unwrap();
        scheduler.mark_running(0);
        assert_eq!(scheduler.nodes()[0].status, PhaseStatus::Running);
        scheduler.mark_completed(0);
        assert!(scheduler.all_complete());
        assert_eq!(scheduler.completed_count(), 1);
    }
}
