use std::collections::HashSet;

use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;
use analyst_common::model::PhaseOutput;

impl Database {
    pub fn insert_output(&self, output: &PhaseOutput) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO phase_outputs
                (id, job_id, phase_number, engine_key, pass_number, work_key, stance_key,
                 role, content, model_used, input_tokens, output_tokens, parent_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                output.id,
                output.job_id,
                output.phase_number,
                output.engine_key,
                output.pass_number,
                output.work_key,
                output.stance_key,
                output.role,
                output.content,
                output.model_used,
                output.input_tokens,
                output.output_tokens,
                output.parent_id,
                output.metadata.to_string(),
                output.created_at.to_rfc3339(),
            ],
        )
        .context("failed to insert phase output")?;
        Ok(())
    }

    pub fn get_outputs_for_phase(&self, job_id: &str, phase_number: f64) -> Result<Vec<PhaseOutput>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_id, phase_number, engine_key, pass_number, work_key, stance_key,
                    role, content, model_used, input_tokens, output_tokens, parent_id, metadata, created_at
             FROM phase_outputs WHERE job_id = ?1 AND phase_number = ?2 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![job_id, phase_number], map_output)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read phase output row")?);
        }
        Ok(out)
    }

    pub fn get_outputs_for_engine(&self, job_id: &str, engine_key: &str) -> Result<Vec<PhaseOutput>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, job_id, phase_number, engine_key, pass_number, work_key, stance_key,
                    role, content, model_used, input_tokens, output_tokens, parent_id, metadata, created_at
             FROM phase_outputs WHERE job_id = ?1 AND engine_key = ?2 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![job_id, engine_key], map_output)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read phase output row")?);
        }
        Ok(out)
    }

    /// Resume watermark: (phase_number, engine_key, pass_number, work_key)
    /// tuples already persisted for a job, so a resumed run can skip calls
    /// it already made.
    pub fn get_completed_passes(&self, job_id: &str) -> Result<HashSet<(String, String, i64, String)>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT phase_number, engine_key, pass_number, work_key
             FROM phase_outputs WHERE job_id = ?1",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            let phase_number: f64 = row.get(0)?;
            Ok((
                format!("{phase_number}"),
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row.context("failed to read watermark row")?);
        }
        Ok(out)
    }

    pub fn get_completed_phases(&self, job_id: &str) -> Result<HashSet<String>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare("SELECT DISTINCT phase_number FROM phase_outputs WHERE job_id = ?1")?;
        let rows = stmt.query_map(params![job_id], |row| {
            let phase_number: f64 = row.get(0)?;
            Ok(format!("{phase_number}"))
        })?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row.context("failed to read phase row")?);
        }
        Ok(out)
    }
}

fn map_output(row: &rusqlite::Row) -> rusqlite::Result<PhaseOutput> {
    let metadata_str: String = row.get(13)?;
    let created_at: String = row.get(14)?;
    Ok(PhaseOutput {
        id: row.get(0)?,
        job_id: row.get(1)?,
        phase_number: row.get(2)?,
        engine_key: row.get(3)?,
        pass_number: row.get::<_, i64>(4)? as u32,
        work_key: row.get(5)?,
        stance_key: row.get(6)?,
        role: row.get(7)?,
        content: row.get(8)?,
        model_used: row.get(9)?,
        input_tokens: row.get::<_, i64>(10)? as u32,
        output_tokens: row.get::<_, i64>(11)? as u32,
        parent_id: row.get(12)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}
