use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;
use analyst_common::plan::{PolishCacheEntry, ViewRefinement};

impl Database {
    pub fn put_polish_cache(&self, entry: &PolishCacheEntry) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO polish_cache (job_id, view_key, style_school, polished_content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, view_key, style_school) DO UPDATE SET
                polished_content = excluded.polished_content,
                created_at = excluded.created_at",
            params![
                entry.job_id,
                entry.view_key,
                entry.style_school,
                entry.polished_content,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("failed to upsert polish cache entry")?;
        Ok(())
    }

    pub fn get_polish_cache(&self, job_id: &str, view_key: &str, style_school: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT polished_content FROM polish_cache WHERE job_id = ?1 AND view_key = ?2 AND style_school = ?3",
        )?;
        let mut rows = stmt.query_map(params![job_id, view_key, style_school], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn put_view_refinement(&self, refinement: &ViewRefinement) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO view_refinements (job_id, view_key, instruction, refined_content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, view_key) DO UPDATE SET
                instruction = excluded.instruction,
                refined_content = excluded.refined_content,
                created_at = excluded.created_at",
            params![
                refinement.job_id,
                refinement.view_key,
                refinement.instruction,
                refinement.refined_content,
                refinement.created_at.to_rfc3339(),
            ],
        )
        .context("failed to upsert view refinement")?;
        Ok(())
    }

    pub fn get_view_refinement(&self, job_id: &str, view_key: &str) -> Result<Option<ViewRefinement>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT job_id, view_key, instruction, refined_content, created_at
             FROM view_refinements WHERE job_id = ?1 AND view_key = ?2",
        )?;
        let mut rows = stmt.query_map(params![job_id, view_key], |row| {
            let created_at: String = row.get(4)?;
            Ok(ViewRefinement {
                job_id: row.get(0)?,
                view_key: row.get(1)?,
                instruction: row.get(2)?,
                refined_content: row.get(3)?,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to read view refinement row")?)),
            None => Ok(None),
        }
    }
}
