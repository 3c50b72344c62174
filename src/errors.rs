//! Typed error hierarchy, one enum per subsystem. Each carries an
//! `#[error(transparent)] Other(#[from] anyhow::Error)` escape hatch so
//! deep call chains can still use `anyhow::Context` without losing the
//! subsystem boundary at the surface.

use thiserror::Error;

/// Persistence layer failures (jobs, documents, outputs, caches).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("document {document_id} not found")]
    DocumentNotFound { document_id: String },

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// LLM client / engine-runner failures.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {model} failed after {retries} retries: {message}")]
    ExhaustedRetries {
        model: String,
        retries: u32,
        message: String,
    },

    #[error("non-retryable provider error: {0}")]
    NonRetryable(String),

    #[error("heartbeat timeout waiting for a stream chunk")]
    HeartbeatTimeout,

    #[error("response salvage failed: only {chars} chars recovered, below the {min} floor")]
    SalvageTooSmall { chars: usize, min: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Plan-synthesis failures.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner returned no parseable JSON plan")]
    Unparseable,

    #[error("plan validation failed: {0}")]
    Invalid(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Job lifecycle failures (create/cancel/resume/delete).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} not found")]
    NotFound { job_id: String },

    #[error("job {job_id} is already in a terminal state ({status})")]
    AlreadyTerminal { job_id: String, status: String },

    #[error("cancel token mismatch for job {job_id}")]
    BadCancelToken { job_id: String },

    #[error("job {job_id} cannot be resumed: {reason}")]
    NotResumable { job_id: String, reason: String },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Single-phase execution failures.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("phase {phase} depends on unknown phase {dependency}")]
    UnknownDependency { phase: f64, dependency: f64 },

    #[error("phase {phase} target is misconfigured: {message}")]
    InvalidTarget { phase: f64, message: String },

    #[error("work item {work_key} failed in phase {phase}: {message}")]
    WorkFailed {
        phase: f64,
        work_key: String,
        message: String,
    },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Whole-workflow (DAG) execution failures.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
