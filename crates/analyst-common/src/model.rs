//! Job, progress, and phase-output types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::ExecutionPlan;

/// Job lifecycle state. Terminal states (`Completed`, `Failed`, `Cancelled`) are
/// write-once: once reached, the job manager refuses further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-phase status, distinct from job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Progress snapshot surfaced by `GET /jobs/{id}`. An explicit struct, not a
/// free map, per the re-architecture guidance in spec.md §9.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_phase: f64,
    pub total_phases: u32,
    pub phase_name: String,
    pub detail: String,
    pub completed_phases: Vec<String>,
    pub phase_statuses: HashMap<String, PhaseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_detail: Option<serde_json::Value>,
}

/// Result of a single LLM call within an engine pass, as recorded on a phase result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCallResult {
    pub engine_key: String,
    pub pass_number: u32,
    pub stance_key: Option<String>,
    pub content: String,
    pub model_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub thinking_tokens: u32,
    pub duration_ms: u64,
    pub retries: u32,
}

/// Compact per-phase result persisted into the job's `phase_results` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_number: f64,
    pub phase_name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub engine_results: HashMap<String, Vec<EngineCallResult>>,
    #[serde(default)]
    pub work_results: Option<HashMap<String, HashMap<String, Vec<EngineCallResult>>>>,
    #[serde(default)]
    pub work_errors: HashMap<String, String>,
    #[serde(default)]
    pub final_output: String,
    pub duration_ms: u64,
    pub total_tokens: u64,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn success(phase_number: f64, phase_name: &str, final_output: String) -> Self {
        Self {
            phase_number,
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Completed,
            engine_results: HashMap::new(),
            work_results: None,
            work_errors: HashMap::new(),
            final_output,
            duration_ms: 0,
            total_tokens: 0,
            error: None,
        }
    }

    pub fn failure(phase_number: f64, phase_name: &str, error: impl Into<String>) -> Self {
        Self {
            phase_number,
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Failed,
            engine_results: HashMap::new(),
            work_results: None,
            work_errors: HashMap::new(),
            final_output: String::new(),
            duration_ms: 0,
            total_tokens: 0,
            error: Some(error.into()),
        }
    }
}

/// One orchestrated run. See spec.md §3 for the full invariant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub plan_id: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(default)]
    pub phase_results: HashMap<String, PhaseResult>,
    pub total_llm_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Frozen plan snapshot. The job owns this (not an external plan store)
    /// so it is self-sufficient for resume after a plan file is lost.
    pub plan_snapshot: Option<ExecutionPlan>,
    pub document_ids: HashMap<String, String>,
    /// Returned only at creation time; never re-served by a later read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_token: Option<String>,
    pub workflow_key: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(job_id: String, plan_id: String, cancel_token: String) -> Self {
        Self {
            job_id,
            plan_id,
            status: JobStatus::Pending,
            progress: JobProgress {
                total_phases: 0,
                detail: "Waiting to start".to_string(),
                ..Default::default()
            },
            phase_results: HashMap::new(),
            total_llm_calls: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            plan_snapshot: None,
            document_ids: HashMap::new(),
            cancel_token: Some(cancel_token),
            workflow_key: "default".to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// One persisted LLM response. The tuple (job, phase, engine, pass, work) is
/// the resume watermark and the uniqueness boundary (spec.md §3, §8 invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub id: String,
    pub job_id: String,
    pub phase_number: f64,
    pub engine_key: String,
    pub pass_number: u32,
    pub work_key: String,
    pub stance_key: String,
    pub role: String,
    pub content: String,
    pub model_used: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub parent_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Identity tuple used by the resume watermark and the uniqueness invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputKey {
    pub phase_number: OrderedF64,
    pub engine_key: String,
    pub pass_number: u32,
    pub work_key: String,
}

/// `f64` wrapper with a total order, so phase numbers can key a `HashSet`/`HashMap`.
/// Phase numbers are always finite human-entered values (e.g. 1.0, 1.5, 2.0);
/// NaN never occurs in practice, so bit-pattern equality is adequate here.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct OrderedF64(pub f64);

impl Eq for OrderedF64 {}
impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl std::hash::Hash for OrderedF64 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_str() {
        for s in ["pending", "running", "completed", "failed", "cancelled"] {
            let status: JobStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
    }

    #[test]
    fn terminal_statuses_are_flagged() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn new_job_starts_pending_with_cancel_token() {
        let job = Job::new("job-1".into(), "plan-1".into(), "tok-abc".into());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.cancel_token.as_deref(), Some("tok-abc"));
        assert_eq!(job.total_llm_calls, 0);
    }

    #[test]
    fn ordered_f64_hashes_consistently() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(OrderedF64(1.0));
        set.insert(OrderedF64(1.5));
        assert!(set.contains(&OrderedF64(1.0)));
        assert!(!set.contains(&OrderedF64(2.0)));
    }
}
