//! Threads the resume watermark and the output store through the
//! chain/phase/engine call stack without widening every function signature
//! by four separate parameters.

use std::collections::HashSet;

use crate::db::Database;

/// `(phase_number, engine_key, pass_number, work_key)` tuples already
/// persisted for this job, per spec.md §4.8's resume contract.
pub type ResumeWatermark = HashSet<(String, String, i64, String)>;

#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub db: &'a Database,
    pub job_id: &'a str,
    pub resume_watermark: &'a ResumeWatermark,
}

impl<'a> ExecutionContext<'a> {
    pub fn is_done(&self, phase_number: f64, engine_key: &str, pass_number: u32, work_key: &str) -> bool {
        self.resume_watermark.contains(&(
            format!("{phase_number}"),
            engine_key.to_string(),
            pass_number as i64,
            work_key.to_string(),
        ))
    }
}
