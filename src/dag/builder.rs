//! Dependency graph over a plan's phases.
//!
//! Builds a directed graph from `PhaseExecutionSpec::depends_on` edges.
//! Unlike a conventional DAG builder, a cycle here is not a build-time
//! error: `PhaseGraph::is_cyclic` reports it and callers fall back to
//! running phases in ascending phase-number order instead of aborting the
//! job (a hand-authored plan dependency loop shouldn't strand a job that
//! could otherwise still make progress).

use std::collections::{HashMap, HashSet};

use analyst_common::plan::PhaseExecutionSpec;
use anyhow::{Result, bail};

pub type PhaseIndex = usize;

#[derive(Debug)]
pub struct PhaseGraph {
    phases: Vec<PhaseExecutionSpec>,
    index_map: HashMap<u64, PhaseIndex>,
    forward_edges: Vec<Vec<PhaseIndex>>,
    reverse_edges: Vec<Vec<PhaseIndex>>,
    cyclic: bool,
}

fn key(n: f64) -> u64 {
    n.to_bits()
}

impl PhaseGraph {
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    pub fn get_phase(&self, index: PhaseIndex) -> Option<&PhaseExecutionSpec> {
        self.phases.get(index)
    }

    pub fn get_index(&self, phase_number: f64) -> Option<PhaseIndex> {
        self.index_map.get(&key(phase_number)).copied()
    }

    pub fn phases(&self) -> &[PhaseExecutionSpec] {
        &self.phases
    }

    pub fn dependents(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn root_phases(&self) -> Vec<PhaseIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn dependencies_satisfied(&self, index: PhaseIndex, completed: &HashSet<PhaseIndex>) -> bool {
        self.dependencies(index).iter().all(|dep| completed.contains(dep))
    }

    /// Sequential fallback order by ascending phase number, used whenever
    /// the graph is cyclic.
    pub fn sequential_order(&self) -> Vec<PhaseIndex> {
        let mut order: Vec<PhaseIndex> = (0..self.phases.len()).collect();
        order.sort_by(|&a, &b| {
            self.phases[a]
                .phase_number
                .partial_cmp(&self.phases[b].phase_number)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }
}

pub struct DagBuilder {
    phases: Vec<PhaseExecutionSpec>,
}

impl DagBuilder {
    pub fn new(phases: Vec<PhaseExecutionSpec>) -> Self {
        Self { phases }
    }

    /// Build the graph. Duplicate phase numbers and dependencies naming a
    /// phase the plan never declared are still hard errors — those are plan
    /// authoring mistakes, not scheduling situations. A dependency cycle is
    /// not: it's recorded on the returned graph instead.
    pub fn build(self) -> Result<PhaseGraph> {
        if self.phases.is_empty() {
            return Ok(PhaseGraph {
                phases: Vec::new(),
                index_map: HashMap::new(),
                forward_edges: Vec::new(),
                reverse_edges: Vec::new(),
                cyclic: false,
            });
        }

        let mut index_map = HashMap::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if index_map.insert(key(phase.phase_number), i).is_some() {
                bail!("duplicate phase number: {}", phase.phase_number);
            }
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];

        for (to_idx, phase) in self.phases.iter().enumerate() {
            for dep in &phase.depends_on {
                let from_idx = *index_map.get(&key(*dep)).ok_or_else(|| {
                    anyhow::anyhow!(
                        "phase {} depends on unknown phase {dep}",
                        phase.phase_number
                    )
                })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let cyclic = !Self::topological_order(&reverse_edges, &forward_edges).1;

        Ok(PhaseGraph {
            phases: self.phases,
            index_map,
            forward_edges,
            reverse_edges,
            cyclic,
        })
    }

    /// Kahn's algorithm. Returns the order produced and whether it covered
    /// every node (false means a cycle remains).
    fn topological_order(
        reverse_edges: &[Vec<PhaseIndex>],
        forward_edges: &[Vec<PhaseIndex>],
    ) -> (Vec<PhaseIndex>, bool) {
        let mut in_degree: Vec<usize> = reverse_edges.iter().map(|d| d.len()).collect();
        let mut queue: Vec<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::new();
        while let Some(node) = queue.pop() {
            order.push(node);
            for &dependent in &forward_edges[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        let acyclic = order.len() == reverse_edges.len();
        (order, acyclic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::plan::{IterationMode, PhaseTarget};
    use std::collections::HashMap as StdHashMap;

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
            per_work_chain_map: StdHashMap::new(),
            skip: false,
            skip_reason: None,
            default_depth: None,
            engine_depth_overrides: StdHashMap::new(),
            chapter_targets: vec![],
            context_emphasis: None,
            rationale: None,
        }
    }

    #[test]
    fn builds_diamond_graph() {
        let phases = vec![
            phase(1.0, vec![]),
            phase(2.0, vec![1.0]),
            phase(3.0, vec![1.0]),
            phase(4.0, vec![2.0, 3.0]),
        ];
        let graph = DagBuilder::new(phases).build().unwrap();
        assert_eq!(graph.len(), 4);
        assert!(!graph.is_cyclic());
        assert_eq!(graph.root_phases(), vec![0]);
    }

    #[test]
    fn cycle_is_reported_not_errored() {
        let phases = vec![
            phase(1.0, vec![3.0]),
            phase(2.0, vec![1.0]),
            phase(3.0, vec![2.0]),
        ];
        let graph = DagBuilder::new(phases).build().unwrap();
        assert!(graph.is_cyclic());
        let seq = graph.sequential_order();
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn missing_dependency_is_still_an_error() {
        let phases = vec![phase(1.0, vec![99.0])];
        let result = DagBuilder::new(phases).build();
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_phase_number_is_an_error() {
        let phases = vec![phase(1.0, vec![]), phase(1.0, vec![])];
        let result = DagBuilder::new(phases).build();
        assert!(result.is_err());
    }

    #[test]
    fn dependencies_satisfied_tracks_completion() {
        let phases = vec![phase(1.0, vec![]), phase(2.0, vec![1.0])];
        let graph = DagBuilder::new(phases).build().unwrap();
        let mut completed = HashSet::new();
        assert!(graph.dependencies_satisfied(0, &completed));
        assert!(!graph.dependencies_satisfied(1, &completed));
        completed.insert(0);
        assert!(graph.dependencies_satisfied(1, &completed));
    }
}
