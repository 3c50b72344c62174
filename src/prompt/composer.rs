//! Builds the system/user prompt pair handed to the LLM client for a single
//! engine pass. Follows `src/factory/planner.rs`'s `build_prompt` shape: a
//! labelled-section template rather than free-form string concatenation.

use analyst_common::documents::Document;
use analyst_common::plan::TargetWork;
use analyst_common::registry::{CapabilityEngine, Stance};

pub struct PromptComposer;

impl PromptComposer {
    /// System prompt: the engine's own instructions, optionally sharpened by
    /// a stance fragment (e.g. "be adversarial", "assume good faith").
    pub fn system_prompt(engine: &CapabilityEngine, stance: Option<&Stance>) -> String {
        match stance {
            Some(stance) => format!("{}\n\n{}", engine.system_prompt, stance.prompt_fragment),
            None => engine.system_prompt.clone(),
        }
    }

    /// User prompt for a standard (whole-corpus) phase pass.
    pub fn standard_pass(
        research_question: &str,
        documents: &[&Document],
        upstream_context: &str,
        inner_pass_context: &str,
    ) -> String {
        let mut sections = vec![format!("## Research question\n{research_question}")];

        if !upstream_context.is_empty() {
            sections.push(format!("## Prior analysis\n{upstream_context}"));
        }
        if !inner_pass_context.is_empty() {
            sections.push(format!("## Your earlier passes\n{inner_pass_context}"));
        }

        sections.push(Self::document_section(documents));
        sections.push("Respond with your analysis directly.".to_string());
        sections.join("\n\n")
    }

    /// User prompt for a per-work phase pass, scoped to one target work.
    pub fn per_work_pass(
        research_question: &str,
        target: &TargetWork,
        documents: &[&Document],
        upstream_context: &str,
    ) -> String {
        let mut sections = vec![
            format!("## Research question\n{research_question}"),
            format!("## Target work\n{} ({})", target.title, target.work_key),
        ];
        if !upstream_context.is_empty() {
            sections.push(format!("## Prior analysis\n{upstream_context}"));
        }
        sections.push(Self::document_section(documents));
        sections.push(format!(
            "Respond with your analysis of \"{}\" directly.",
            target.title
        ));
        sections.join("\n\n")
    }

    /// User prompt for a chapter-targeted phase pass, scoped to one chapter.
    pub fn chapter_pass(
        research_question: &str,
        chapter_title: &str,
        chapter_text: &str,
        upstream_context: &str,
    ) -> String {
        let mut sections = vec![
            format!("## Research question\n{research_question}"),
            format!("## Chapter\n{chapter_title}"),
        ];
        if !upstream_context.is_empty() {
            sections.push(format!("## Prior analysis\n{upstream_context}"));
        }
        sections.push(format!("## Chapter text\n{chapter_text}"));
        sections.push("Respond with your analysis of this chapter directly.".to_string());
        sections.join("\n\n")
    }

    /// User prompt for one step in a chain, threading the prior step's
    /// output in rather than the original corpus context.
    pub fn chain_step_pass(research_question: &str, prior_step_context: &str, own_prior_input: &str) -> String {
        let mut sections = vec![format!("## Research question\n{research_question}")];
        if !prior_step_context.is_empty() {
            sections.push(format!("## Prior chain steps\n{prior_step_context}"));
        }
        sections.push(format!("## Input to analyze\n{own_prior_input}"));
        sections.push("Respond with your analysis directly.".to_string());
        sections.join("\n\n")
    }

    fn document_section(documents: &[&Document]) -> String {
        if documents.is_empty() {
            return "## Corpus\n(no documents attached)".to_string();
        }
        let mut body = String::from("## Corpus\n");
        for doc in documents {
            body.push_str(&format!("### {}\n{}\n\n", doc.title, doc.content));
        }
        body
    }
}
