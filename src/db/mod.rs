//! Persistence layer: jobs, documents, phase outputs, and the presentation
//! and polish caches. One `Database` handle wraps a single `rusqlite`
//! connection behind a `Mutex`, the same shape `FactoryDb` used, since
//! `rusqlite::Connection` is `!Sync`.

mod documents;
mod jobs;
mod outputs;
mod polish_cache;
mod presentation_cache;

pub use documents::*;
pub use jobs::*;
pub use outputs::*;
pub use polish_cache::*;
pub use presentation_cache::*;

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::errors::DbError;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("failed to create database directory")?;
            }
        }
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| DbError::Other(anyhow::anyhow!("db mutex poisoned")))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .context("failed to set pragmas")?;
        conn.execute_batch(MIGRATIONS).context("failed to run migrations")?;
        Ok(())
    }
}

/// Mirrors `original_source/src/executor/db.py`'s schema. `executor_jobs`
/// stores the frozen plan snapshot and phase_results as JSON text columns,
/// same as the Python original, rather than normalizing them into rows —
/// the job record is read back as a whole far more often than any one
/// phase result is queried in isolation.
const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS executor_jobs (
    job_id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    workflow_key TEXT NOT NULL DEFAULT 'default',
    progress TEXT NOT NULL DEFAULT '{}',
    phase_results TEXT NOT NULL DEFAULT '{}',
    total_llm_calls INTEGER NOT NULL DEFAULT 0,
    total_input_tokens INTEGER NOT NULL DEFAULT 0,
    total_output_tokens INTEGER NOT NULL DEFAULT 0,
    plan_snapshot TEXT,
    document_ids TEXT NOT NULL DEFAULT '{}',
    request_snapshot TEXT,
    error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    started_at TEXT,
    completed_at TEXT,
    last_heartbeat_at TEXT,
    cancel_token TEXT
);

CREATE TABLE IF NOT EXISTS executor_documents (
    document_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    content_type TEXT NOT NULL DEFAULT 'text/plain',
    char_count INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS phase_outputs (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES executor_jobs(job_id) ON DELETE CASCADE,
    phase_number REAL NOT NULL,
    engine_key TEXT NOT NULL,
    pass_number INTEGER NOT NULL DEFAULT 1,
    work_key TEXT NOT NULL DEFAULT '',
    stance_key TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT 'assistant',
    content TEXT NOT NULL,
    model_used TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    parent_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(job_id, phase_number, engine_key, pass_number, work_key)
);

CREATE INDEX IF NOT EXISTS idx_phase_outputs_job_phase ON phase_outputs(job_id, phase_number);
CREATE INDEX IF NOT EXISTS idx_phase_outputs_job_engine ON phase_outputs(job_id, engine_key);

CREATE TABLE IF NOT EXISTS presentation_cache (
    output_id TEXT NOT NULL,
    section TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    rendered TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(output_id, section)
);

CREATE TABLE IF NOT EXISTS view_refinements (
    job_id TEXT NOT NULL,
    view_key TEXT NOT NULL,
    instruction TEXT NOT NULL,
    refined_content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(job_id, view_key)
);

CREATE TABLE IF NOT EXISTS polish_cache (
    job_id TEXT NOT NULL,
    view_key TEXT NOT NULL,
    style_school TEXT NOT NULL,
    polished_content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(job_id, view_key, style_school)
);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_runs_migrations_idempotently() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
    }
}
