//! Closes the gap between opaque analytical prose and the structured shapes
//! renderers want: resolves each view's data source, expands per-work views
//! into one task per work key, concatenates multi-pass output, and runs the
//! transformation executor behind a content-hash cache.

use sha2::{Digest, Sha256};

use analyst_common::model::PhaseOutput;
use analyst_common::plan::TargetWork;
use analyst_common::registry::{TransformationType, ViewDefinition, ViewSource};

use crate::db::Database;
use crate::errors::PhaseError;
use crate::llm::{LlmClient, LlmRequest};

/// One unit of rendering work: a view (optionally scoped to one work item)
/// whose source content has been located and is ready for transformation.
pub struct BridgeTask {
    pub view_key: String,
    pub work_key: Option<String>,
    pub section_key: String,
    pub source_content: String,
    /// Set when a view points at an engine that ran several passes —
    /// concatenated passes bypass the freshness check, since their combined
    /// hash would never match any single pass's content.
    pub skip_freshness_check: bool,
}

pub struct RenderedSection {
    pub view_key: String,
    pub work_key: Option<String>,
    pub section_key: String,
    pub rendered: String,
}

pub struct PresentationBridge<'a> {
    llm: &'a LlmClient,
    db: &'a Database,
    fast_model: String,
    strong_model: String,
}

impl<'a> PresentationBridge<'a> {
    pub fn new(llm: &'a LlmClient, db: &'a Database, fast_model: impl Into<String>, strong_model: impl Into<String>) -> Self {
        Self { llm, db, fast_model: fast_model.into(), strong_model: strong_model.into() }
    }

    /// Resolves every view into zero or more tasks: a view with no
    /// applicable template and an explicit "none" transformation produces
    /// none; a per-work view produces one task per target work.
    pub fn plan_tasks(
        &self,
        job_id: &str,
        views: &[ViewDefinition],
        target_works: &[TargetWork],
    ) -> Result<Vec<BridgeTask>, PhaseError> {
        let mut tasks = Vec::new();
        for view in views {
            if view.transformation_type == TransformationType::None {
                continue;
            }

            let (phase_number, engine_key) = match &view.source {
                ViewSource::Engine { phase_number, engine_key } => (*phase_number, engine_key.clone()),
                ViewSource::Chain { phase_number, chain_key } => (*phase_number, chain_key.clone()),
            };

            if view.per_work {
                for work in target_works {
                    if let Some(task) = self.build_task(job_id, view, phase_number, &engine_key, Some(&work.work_key))? {
                        tasks.push(task);
                    }
                }
            } else if let Some(task) = self.build_task(job_id, view, phase_number, &engine_key, None)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn build_task(
        &self,
        job_id: &str,
        view: &ViewDefinition,
        phase_number: f64,
        engine_key: &str,
        work_key: Option<&str>,
    ) -> Result<Option<BridgeTask>, PhaseError> {
        let outputs = self.db.get_outputs_for_phase(job_id, phase_number).map_err(PhaseError::Other)?;
        let mut matching: Vec<&PhaseOutput> = outputs
            .iter()
            .filter(|o| o.engine_key == engine_key)
            .filter(|o| work_key.map(|k| o.work_key == k).unwrap_or(true))
            .collect();
        matching.sort_by_key(|o| o.pass_number);

        if matching.is_empty() {
            return Ok(None);
        }

        let section_key = format!("dyn:{}:{}", engine_key, view.renderer_type);
        let skip_freshness_check = matching.len() > 1;
        let source_content = matching.iter().map(|o| o.content.as_str()).collect::<Vec<_>>().join("\n\n---\n\n");

        Ok(Some(BridgeTask {
            view_key: view.view_key.clone(),
            work_key: work_key.map(|s| s.to_string()),
            section_key,
            source_content,
            skip_freshness_check,
        }))
    }

    /// Runs every planned task, checking the cache unless `force` or the
    /// task is a multi-pass concatenation (which never has a stable single
    /// output_id to key against).
    pub async fn execute(
        &self,
        job_id: &str,
        views: &[ViewDefinition],
        tasks: Vec<BridgeTask>,
        force: bool,
    ) -> Result<Vec<RenderedSection>, PhaseError> {
        let mut rendered = Vec::with_capacity(tasks.len());
        for task in tasks {
            let view = views
                .iter()
                .find(|v| v.view_key == task.view_key)
                .ok_or_else(|| PhaseError::InvalidTarget {
                    phase: 0.0,
                    message: format!("task references unknown view '{}'", task.view_key),
                })?;

            let output_id = match &task.work_key {
                Some(work_key) => format!("{job_id}:{work_key}"),
                None => job_id.to_string(),
            };
            let hash = content_hash(&task.source_content);

            if !force && !task.skip_freshness_check {
                if let Some(cached) = self.db.get_presentation_cache(&output_id, &task.section_key, &hash).map_err(PhaseError::Other)? {
                    rendered.push(RenderedSection {
                        view_key: task.view_key.clone(),
                        work_key: task.work_key.clone(),
                        section_key: task.section_key.clone(),
                        rendered: cached,
                    });
                    continue;
                }
            }

            let content = self.transform(view, &task.source_content).await?;

            if !task.skip_freshness_check {
                self.db
                    .put_presentation_cache(&analyst_common::plan::PresentationCacheEntry {
                        output_id: output_id.clone(),
                        section: task.section_key.clone(),
                        content_hash: hash,
                        rendered: content.clone(),
                        created_at: chrono::Utc::now(),
                    })
                    .map_err(PhaseError::Other)?;
            }

            rendered.push(RenderedSection {
                view_key: task.view_key,
                work_key: task.work_key,
                section_key: task.section_key,
                rendered: content,
            });
        }
        Ok(rendered)
    }

    async fn transform(&self, view: &ViewDefinition, source: &str) -> Result<String, PhaseError> {
        match view.transformation_type {
            TransformationType::None => Ok(String::new()),
            TransformationType::Passthrough => Ok(source.to_string()),
            TransformationType::SchemaRename => Ok(source.to_string()),
            TransformationType::GroupAggregate => Ok(source.to_string()),
            TransformationType::LlmExtract | TransformationType::LlmSummarize => {
                self.llm_transform(view, source).await
            }
        }
    }

    /// Fast model first, strong model if the fast model's call fails —
    /// the same fallback chain the prose says presentation rendering uses.
    async fn llm_transform(&self, view: &ViewDefinition, source: &str) -> Result<String, PhaseError> {
        let instruction = if view.transformation_type == TransformationType::LlmSummarize {
            "Summarize the following analysis for presentation."
        } else {
            "Extract the structured data the following analysis implies, as described by the view's renderer config."
        };
        let prompt = format!("{instruction}\n\nRenderer: {}\n\nSource:\n{source}", view.renderer_type);

        let fast_request = LlmRequest {
            model: self.fast_model.clone(),
            system_prompt: "You prepare analysis prose for structured presentation.".to_string(),
            user_prompt: prompt.clone(),
            max_tokens: 2048,
            allow_thinking: false,
        };

        match self.llm.call(&fast_request).await {
            Ok(response) => Ok(response.content),
            Err(err) => {
                tracing::warn!(view_key = %view.view_key, error = %err, "fast model failed presentation transform, falling back to strong model");
                let strong_request = LlmRequest { model: self.strong_model.clone(), ..fast_request };
                let response = self.llm.call(&strong_request).await?;
                Ok(response.content)
            }
        }
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_sensitive_to_change() {
        let a = content_hash("hello");
        let b = content_hash("hello");
        let c = content_hash("goodbye");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
