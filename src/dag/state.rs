//! Workflow-level execution state and summary.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DagState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DagState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagSummary {
    pub total_phases: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub phase_errors: HashMap<String, String>,
}

impl DagSummary {
    pub fn new(total_phases: usize) -> Self {
        Self { total_phases, ..Default::default() }
    }

    pub fn record_success(&mut self, phase_number: f64) {
        let _ = phase_number;
        self.completed += 1;
    }

    pub fn record_failure(&mut self, phase_number: f64, error: impl Into<String>) {
        self.failed += 1;
        self.phase_errors.insert(phase_number.to_string(), error.into());
    }

    pub fn record_skip(&mut self, phase_number: f64) {
        self.skipped += 1;
        let _ = phase_number;
    }

    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.completed == self.total_phases
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
