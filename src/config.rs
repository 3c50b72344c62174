//! Runtime configuration for the orchestrator service.
//!
//! Resolution order for every setting is CLI flag > environment variable >
//! default, mirroring the env-first, flag-override convention the original
//! config layer used. `dotenvy` loads a `.env` file before clap parses, so
//! local development needs no shell exports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Database backend selection. A `sqlite:` URL (the default) opens a local
/// file through `rusqlite`; anything else is rejected at startup rather than
/// silently falling back, since no second backend is implemented.
#[derive(Debug, Clone)]
pub enum DatabaseBackend {
    Sqlite(PathBuf),
}

impl DatabaseBackend {
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("sqlite:") {
            return Ok(DatabaseBackend::Sqlite(PathBuf::from(path)));
        }
        anyhow::bail!("unsupported EXECUTOR_DATABASE_URL scheme in '{url}' (only sqlite: is supported)")
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "analyst-orchestrator", about = "LLM analysis orchestrator service")]
pub struct Config {
    /// Address to bind the HTTP surface to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// `sqlite:<path>` connection string for job/document/output storage.
    #[arg(long, env = "EXECUTOR_DATABASE_URL", default_value = "sqlite:./data/executor.db")]
    pub database_url: String,

    /// Directory holding the engine/stance/chain/view catalog YAML files.
    #[arg(long, env = "CATALOG_DIR", default_value = "./catalog")]
    pub catalog_dir: PathBuf,

    /// Root Anthropic API key. Required before any job can be run; absence
    /// is not fatal at startup so `--help`/health checks still work.
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    pub anthropic_api_key: Option<String>,

    /// Base URL for the Anthropic Messages API, overridable for tests.
    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com")]
    pub anthropic_base_url: String,

    /// Max concurrent LLM calls within one dependency-group wave.
    #[arg(long, env = "DEPENDENCY_GROUP_CONCURRENCY", default_value_t = 2)]
    pub dependency_group_concurrency: usize,

    /// Max concurrent LLM calls across per-work fan-out within one phase.
    #[arg(long, env = "PER_WORK_CONCURRENCY", default_value_t = 3)]
    pub per_work_concurrency: usize,

    /// Cheap/fast model used for document classification and presentation
    /// transforms, tried before falling back to `strong_model`.
    #[arg(long, env = "FAST_MODEL", default_value = "claude-haiku-4-5")]
    pub fast_model: String,

    /// Primary analysis model, and the fallback when `fast_model` fails.
    #[arg(long, env = "STRONG_MODEL", default_value = "claude-sonnet-4-5")]
    pub strong_model: String,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Emit JSON-formatted log lines instead of the human-readable default.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `.env` (if present), then CLI args/env vars.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Ok(Config::parse())
    }

    pub fn database_backend(&self) -> Result<DatabaseBackend> {
        DatabaseBackend::parse(&self.database_url)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is not set; no job can run without it")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let DatabaseBackend::Sqlite(path) = self.database_backend()? {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("failed to create database directory")?;
                }
            }
        }
        if let Some(dir) = &self.log_dir {
            std::fs::create_dir_all(dir).context("failed to create log directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_url_parses_to_path() {
        let backend = DatabaseBackend::parse("sqlite:./data/executor.db").unwrap();
        match backend {
            DatabaseBackend::Sqlite(path) => assert_eq!(path, PathBuf::from("./data/executor.db")),
        }
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let result = DatabaseBackend::parse("postgres://localhost/db");
        assert!(result.is_err());
    }

    #[test]
    fn config_parses_from_args_with_defaults() {
        let config = Config::parse_from(["analyst-orchestrator"]);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.dependency_group_concurrency, 2);
        assert_eq!(config.per_work_concurrency, 3);
    }

    #[test]
    fn require_api_key_errors_when_absent() {
        let mut config = Config::parse_from(["analyst-orchestrator"]);
        config.anthropic_api_key = None;
        assert!(config.require_api_key().is_err());
    }
}
