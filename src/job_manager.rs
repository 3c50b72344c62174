//! Job lifecycle: creation with idempotency, cancellation, orphan recovery,
//! and stale-job detection. Direct port of
//! `original_source/src/executor/job_manager.py`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use analyst_common::model::{Job, JobStatus};
use analyst_common::plan::WorkflowExecutionPlan;

use crate::db::Database;
use crate::errors::JobError;

/// A freshly-submitted request is folded into an existing job instead of a
/// new one if a job with the same research question + documents started
/// within this window.
pub const IDEMPOTENCY_WINDOW_SECONDS: i64 = 60;

/// An orphaned job (process restarted mid-run) is still recoverable within
/// this grace period after its last heartbeat.
pub const RECOVERY_GRACE_PERIOD_SECONDS: i64 = 300;

/// A running job with no heartbeat for longer than this is declared stale
/// and failed outright, regardless of grace-period recovery.
pub const MAX_JOB_RUNTIME_SECONDS: i64 = 3 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No request/plan snapshot recoverable and past grace period: fail it.
    Fail { reason: String },
    /// Only the original request is recoverable: the job must be re-planned.
    Replan,
    /// A full plan snapshot exists: execution can resume from the
    /// resume watermark.
    Resume,
    /// Still within the grace period; leave it alone for now.
    WithinGracePeriod,
}

pub struct JobManager {
    db: Arc<Database>,
    /// In-memory cancellation flags, checked far more often than the DB
    /// column is written; a process restart loses this map, which is why
    /// `cancel_requested` also falls back to reading the job's `error`
    /// column sentinel.
    cancel_flags: DashMap<String, String>,
}

impl JobManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, cancel_flags: DashMap::new() }
    }

    /// Creates a job, minting a cancel token, unless an equivalent job was
    /// created in the last `IDEMPOTENCY_WINDOW_SECONDS` — in which case that
    /// job is returned instead (without a cancel token, since the caller
    /// didn't create it).
    pub fn create_job(&self, plan_id: &str, dedupe_key: &str) -> anyhow::Result<Job> {
        let since = Utc::now() - chrono::Duration::seconds(IDEMPOTENCY_WINDOW_SECONDS);
        for existing in self.db.recent_jobs(since)? {
            if existing.plan_id == plan_id && existing.document_ids.get("__dedupe_key") == Some(&dedupe_key.to_string()) {
                info!(job_id = %existing.job_id, "idempotent job creation, returning existing job");
                return Ok(existing);
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let cancel_token = Uuid::new_v4().to_string();
        let mut job = Job::new(job_id, plan_id.to_string(), cancel_token);
        job.document_ids.insert("__dedupe_key".to_string(), dedupe_key.to_string());
        self.db.insert_job(&job)?;
        Ok(job)
    }

    /// Creates a job carrying a frozen plan snapshot and the document IDs it
    /// was planned against, honoring the same idempotency window as
    /// `create_job`.
    pub fn create_job_for_plan(
        &self,
        plan: &WorkflowExecutionPlan,
        document_ids: &[String],
        dedupe_key: &str,
    ) -> anyhow::Result<Job> {
        let since = Utc::now() - chrono::Duration::seconds(IDEMPOTENCY_WINDOW_SECONDS);
        for existing in self.db.recent_jobs(since)? {
            if existing.plan_id == plan.plan_id && existing.document_ids.get("__dedupe_key") == Some(&dedupe_key.to_string()) {
                info!(job_id = %existing.job_id, "idempotent job creation, returning existing job");
                return Ok(existing);
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let cancel_token = Uuid::new_v4().to_string();
        let mut job = Job::new(job_id, plan.plan_id.clone(), cancel_token);
        job.plan_snapshot = Some(plan.clone());
        job.progress.total_phases = plan.phases.len() as u32;
        for (i, id) in document_ids.iter().enumerate() {
            job.document_ids.insert(format!("doc_{i}"), id.clone());
        }
        job.document_ids.insert("__dedupe_key".to_string(), dedupe_key.to_string());
        self.db.insert_job(&job)?;
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> anyhow::Result<Job> {
        self.db
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound { job_id: job_id.to_string() }.into())
    }

    pub fn mark_running(&self, job_id: &str) -> anyhow::Result<()> {
        self.db.update_job_status(job_id, JobStatus::Running, None)?;
        Ok(())
    }

    pub fn mark_completed(&self, job_id: &str) -> anyhow::Result<()> {
        self.db.update_job_status(job_id, JobStatus::Completed, None)?;
        self.cancel_flags.remove(job_id);
        Ok(())
    }

    pub fn mark_failed(&self, job_id: &str, error: &str) -> anyhow::Result<()> {
        self.db.update_job_status(job_id, JobStatus::Failed, Some(error))?;
        self.cancel_flags.remove(job_id);
        Ok(())
    }

    /// Requests cancellation. The provided token must match the one minted
    /// at job creation, read back from its own narrow-scoped column (never
    /// the public `Job.cancel_token`, which is only ever populated at
    /// creation time).
    pub fn request_cancel(&self, job_id: &str, cancel_token: &str) -> anyhow::Result<()> {
        let job = self.get_job(job_id)?;
        if job.status.is_terminal() {
            return Err(JobError::AlreadyTerminal { job_id: job_id.to_string(), status: job.status.to_string() }.into());
        }
        let stored = self.db.cancel_token_for(job_id)?;
        if stored.as_deref() != Some(cancel_token) {
            return Err(JobError::BadCancelToken { job_id: job_id.to_string() }.into());
        }
        self.cancel_flags.insert(job_id.to_string(), cancel_token.to_string());
        Ok(())
    }

    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        self.cancel_flags.contains_key(job_id)
    }

    pub fn complete_cancel(&self, job_id: &str) -> anyhow::Result<()> {
        self.db.update_job_status(job_id, JobStatus::Cancelled, Some("cancelled by request"))?;
        self.cancel_flags.remove(job_id);
        Ok(())
    }

    pub fn delete_job(&self, job_id: &str) -> anyhow::Result<()> {
        self.db.delete_job(job_id)?;
        self.cancel_flags.remove(job_id);
        Ok(())
    }

    /// Decides what to do with a job found `Running` at process startup
    /// (an orphan from the previous process).
    pub fn recover_orphan(&self, job: &Job, now: DateTime<Utc>) -> RecoveryAction {
        let started = job.started_at.unwrap_or(job.created_at);
        let elapsed = now.signed_duration_since(started).num_seconds();

        if elapsed > MAX_JOB_RUNTIME_SECONDS {
            return RecoveryAction::Fail { reason: "job exceeded maximum runtime without completing".to_string() };
        }

        if job.plan_snapshot.is_some() {
            return RecoveryAction::Resume;
        }

        if elapsed <= RECOVERY_GRACE_PERIOD_SECONDS {
            return RecoveryAction::WithinGracePeriod;
        }

        if !job.document_ids.is_empty() {
            return RecoveryAction::Replan;
        }

        RecoveryAction::Fail {
            reason: "orphaned job has neither a plan snapshot nor a request to replay, and is past the recovery grace period".to_string(),
        }
    }

    /// Scans all non-terminal jobs at startup, applying `recover_orphan` to
    /// each and updating the DB accordingly. Returns jobs that should be
    /// resumed by the caller (workflow runner picks these back up).
    pub fn recover_all_orphans(&self) -> anyhow::Result<Vec<Job>> {
        let now = Utc::now();
        let mut resumable = Vec::new();
        for job in self.db.list_jobs()? {
            if job.status != JobStatus::Running {
                continue;
            }
            match self.recover_orphan(&job, now) {
                RecoveryAction::Resume => resumable.push(job),
                RecoveryAction::Replan => {
                    warn!(job_id = %job.job_id, "orphan job has no plan snapshot, needs replanning");
                    resumable.push(job);
                }
                RecoveryAction::Fail { reason } => {
                    warn!(job_id = %job.job_id, reason, "orphan job recovery failed, marking job failed");
                    self.mark_failed(&job.job_id, &reason)?;
                }
                RecoveryAction::WithinGracePeriod => {
                    info!(job_id = %job.job_id, "orphan job still within recovery grace period, leaving as running");
                }
            }
        }
        Ok(resumable)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(RECOVERY_GRACE_PERIOD_SECONDS as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::plan::ExecutionPlan;

    fn db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn create_job_is_idempotent_within_window() {
        let manager = JobManager::new(db());
        let job1 = manager.create_job("plan-1", "dedupe-a").unwrap();
        let job2 = manager.create_job("plan-1", "dedupe-a").unwrap();
        assert_eq!(job1.job_id, job2.job_id);
    }

    #[test]
    fn create_job_with_different_dedupe_key_makes_a_new_job() {
        let manager = JobManager::new(db());
        let job1 = manager.create_job("plan-1", "dedupe-a").unwrap();
        let job2 = manager.create_job("plan-1", "dedupe-b").unwrap();
        assert_ne!(job1.job_id, job2.job_id);
    }

    #[test]
    fn cancel_with_wrong_token_is_rejected() {
        let manager = JobManager::new(db());
        let job = manager.create_job_for_plan(
            &ExecutionPlan {
                plan_id: "plan-1".into(),
                research_question: "q".into(),
                target_works: vec![],
                phases: vec![],
                chains: vec![],
                view_recommendations: vec![],
                created_at: Utc::now(),
            },
            &[],
            "k1",
        ).unwrap();
        let result = manager.request_cancel(&job.job_id, "not-the-real-token");
        assert!(result.is_err());
        assert!(manager.request_cancel(&job.job_id, job.cancel_token.as_deref().unwrap()).is_ok());
    }

    #[test]
    fn cancel_on_terminal_job_is_rejected() {
        let manager = JobManager::new(db());
        let job = manager.create_job("plan-1", "k1").unwrap();
        manager.mark_completed(&job.job_id).unwrap();
        let result = manager.request_cancel(&job.job_id, "tok");
        assert!(result.is_err());
    }

    #[test]
    fn orphan_past_max_runtime_is_failed() {
        let manager = JobManager::new(db());
        let mut job = manager.create_job("plan-1", "k1").unwrap();
        job.started_at = Some(Utc::now() - chrono::Duration::hours(4));
        let action = manager.recover_orphan(&job, Utc::now());
        assert!(matches!(action, RecoveryAction::Fail { .. }));
    }

    #[test]
    fn orphan_with_plan_snapshot_resumes() {
        let manager = JobManager::new(db());
        let mut job = manager.create_job("plan-1", "k1").unwrap();
        job.started_at = Some(Utc::now() - chrono::Duration::minutes(10));
        job.plan_snapshot = Some(ExecutionPlan {
            plan_id: "plan-1".into(),
            research_question: "q".into(),
            target_works: vec![],
            phases: vec![],
            chains: vec![],
            view_recommendations: vec![],
            created_at: Utc::now(),
        });
        let action = manager.recover_orphan(&job, Utc::now());
        assert_eq!(action, RecoveryAction::Resume);
    }

    #[test]
    fn orphan_within_grace_period_is_left_alone() {
        let manager = JobManager::new(db());
        let mut job = manager.create_job("plan-1", "k1").unwrap();
        job.started_at = Some(Utc::now() - chrono::Duration::seconds(30));
        let action = manager.recover_orphan(&job, Utc::now());
        assert_eq!(action, RecoveryAction::WithinGracePeriod);
    }
}
