use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::Database;
use analyst_common::model::{Job, JobProgress, JobStatus, PhaseResult};
use analyst_common::plan::ExecutionPlan;

impl Database {
    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO executor_jobs
                (job_id, plan_id, status, workflow_key, progress, phase_results,
                 total_llm_calls, total_input_tokens, total_output_tokens,
                 plan_snapshot, document_ids, error, created_at, started_at, completed_at, cancel_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.job_id,
                job.plan_id,
                job.status.to_string(),
                job.workflow_key,
                serde_json::to_string(&job.progress)?,
                serde_json::to_string(&job.phase_results)?,
                job.total_llm_calls as i64,
                job.total_input_tokens as i64,
                job.total_output_tokens as i64,
                job.plan_snapshot.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&job.document_ids)?,
                job.error,
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.cancel_token,
            ],
        )
        .context("failed to insert job")?;
        Ok(())
    }

    /// Looks up the cancel token stamped on the job at creation time. Kept
    /// separate from `get_job`/`map_job` so the token never round-trips
    /// through the public `Job` struct on an ordinary read.
    pub fn cancel_token_for(&self, job_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.query_row(
            "SELECT cancel_token FROM executor_jobs WHERE job_id = ?1",
            params![job_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .context("failed to read cancel token")
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, plan_id, status, workflow_key, progress, phase_results,
                    total_llm_calls, total_input_tokens, total_output_tokens,
                    plan_snapshot, document_ids, error, created_at, started_at, completed_at
             FROM executor_jobs WHERE job_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![job_id], map_job)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, plan_id, status, workflow_key, progress, phase_results,
                    total_llm_calls, total_input_tokens, total_output_tokens,
                    plan_snapshot, document_ids, error, created_at, started_at, completed_at
             FROM executor_jobs ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], map_job)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read job row")??);
        }
        Ok(out)
    }

    /// The last ~5 recently created pending/running jobs within `window` of
    /// `now`, used by the job manager's idempotency check (same plan id
    /// recently submitted gets the existing job back instead of a
    /// duplicate). Terminal jobs are excluded: a job that already finished
    /// is not "still in flight" no matter how recently it was created.
    pub fn recent_jobs(&self, since: DateTime<Utc>) -> Result<Vec<Job>> {
        const RECENT_JOBS_LIMIT: i64 = 5;
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, plan_id, status, workflow_key, progress, phase_results,
                    total_llm_calls, total_input_tokens, total_output_tokens,
                    plan_snapshot, document_ids, error, created_at, started_at, completed_at
             FROM executor_jobs
             WHERE created_at >= ?1 AND status IN ('pending', 'running')
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339(), RECENT_JOBS_LIMIT], map_job)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read job row")??);
        }
        Ok(out)
    }

    pub fn update_job_status(&self, job_id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let now = Utc::now().to_rfc3339();
        match status {
            JobStatus::Running => {
                conn.execute(
                    "UPDATE executor_jobs SET status = ?1, started_at = COALESCE(started_at, ?2) WHERE job_id = ?3",
                    params![status.to_string(), now, job_id],
                )?;
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                conn.execute(
                    "UPDATE executor_jobs SET status = ?1, error = ?2, completed_at = ?3 WHERE job_id = ?4",
                    params![status.to_string(), error, now, job_id],
                )?;
            }
            JobStatus::Pending => {
                conn.execute(
                    "UPDATE executor_jobs SET status = ?1 WHERE job_id = ?2",
                    params![status.to_string(), job_id],
                )?;
            }
        }
        Ok(())
    }

    pub fn update_job_progress(&self, job_id: &str, progress: &JobProgress) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "UPDATE executor_jobs SET progress = ?1, last_heartbeat_at = ?2 WHERE job_id = ?3",
            params![serde_json::to_string(progress)?, Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn record_phase_result(&self, job_id: &str, result: &PhaseResult) -> Result<()> {
        let mut job = self
            .get_job(job_id)?
            .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))?;
        job.phase_results.insert(result.phase_number.to_string(), result.clone());
        job.total_llm_calls += result.engine_results.values().map(|v| v.len() as u64).sum::<u64>();
        job.total_input_tokens += result
            .engine_results
            .values()
            .flatten()
            .map(|c| c.input_tokens as u64)
            .sum::<u64>();
        job.total_output_tokens += result
            .engine_results
            .values()
            .flatten()
            .map(|c| c.output_tokens as u64)
            .sum::<u64>();

        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "UPDATE executor_jobs
             SET phase_results = ?1, total_llm_calls = ?2, total_input_tokens = ?3, total_output_tokens = ?4
             WHERE job_id = ?5",
            params![
                serde_json::to_string(&job.phase_results)?,
                job.total_llm_calls as i64,
                job.total_input_tokens as i64,
                job.total_output_tokens as i64,
                job_id,
            ],
        )?;
        Ok(())
    }

    pub fn touch_heartbeat(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "UPDATE executor_jobs SET last_heartbeat_at = ?1 WHERE job_id = ?2",
            params![Utc::now().to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute("DELETE FROM executor_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }
}

fn map_job(row: &rusqlite::Row) -> rusqlite::Result<Result<Job>> {
    Ok((|| -> Result<Job> {
        let status_str: String = row.get(2)?;
        let progress_str: String = row.get(4)?;
        let phase_results_str: String = row.get(5)?;
        let plan_snapshot_str: Option<String> = row.get(9)?;
        let document_ids_str: String = row.get(10)?;
        let created_at: String = row.get(12)?;
        let started_at: Option<String> = row.get(13)?;
        let completed_at: Option<String> = row.get(14)?;

        Ok(Job {
            job_id: row.get(0)?,
            plan_id: row.get(1)?,
            status: status_str.parse().context("invalid job status in db")?,
            progress: serde_json::from_str::<JobProgress>(&progress_str).unwrap_or_default(),
            phase_results: serde_json::from_str::<HashMap<String, PhaseResult>>(&phase_results_str)
                .unwrap_or_default(),
            total_llm_calls: row.get::<_, i64>(6)? as u64,
            total_input_tokens: row.get::<_, i64>(7)? as u64,
            total_output_tokens: row.get::<_, i64>(8)? as u64,
            plan_snapshot: plan_snapshot_str
                .map(|s| serde_json::from_str::<ExecutionPlan>(&s))
                .transpose()
                .context("invalid plan snapshot in db")?,
            document_ids: serde_json::from_str(&document_ids_str).unwrap_or_default(),
            cancel_token: None,
            workflow_key: row.get(3)?,
            created_at: parse_ts(&created_at),
            started_at: started_at.as_deref().map(parse_ts),
            completed_at: completed_at.as_deref().map(parse_ts),
            error: row.get(11)?,
        })
    })())
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
