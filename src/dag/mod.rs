//! Dependency graph over a plan's phases: build, detect cycles (gracefully),
//! and compute execution waves. Actual phase execution lives in
//! `crate::workflow_runner`, which drives a `DagScheduler` produced here.

mod builder;
mod scheduler;
mod state;

pub use builder::{DagBuilder, PhaseGraph, PhaseIndex};
pub use scheduler::{DagScheduler, PhaseNode, PhaseStatus};
pub use state::{DagState, DagSummary};
