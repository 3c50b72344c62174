//! Assembles the context blocks fed into each LLM call.
//!
//! Direct port of `original_source/src/executor/context_broker.py`. Three
//! assembly modes: cross-phase (an upstream phase's output feeding a
//! downstream phase), inner-pass (a multi-pass engine's own prior pass),
//! and chain-step (one chain step's output feeding the next step).

use analyst_common::model::PhaseResult;

/// Per-block truncation ceiling. A single upstream phase's contribution to
/// a prompt is capped here regardless of how many phases feed in.
pub const MAX_CHARS_PER_BLOCK: usize = 50_000;

/// Public truncation entry point for callers assembling a single work
/// item's (or chapter's) context outside the three named assembly modes.
pub fn truncate_for_work(content: &str) -> String {
    truncate_block(content)
}

fn truncate_block(content: &str) -> String {
    if content.chars().count() <= MAX_CHARS_PER_BLOCK {
        return content.to_string();
    }
    let truncated: String = content.chars().take(MAX_CHARS_PER_BLOCK).collect();
    let omitted = content.chars().count() - MAX_CHARS_PER_BLOCK;
    format!("{truncated}\n\n[... truncated, {omitted} characters omitted ...]")
}

/// Assembles context from a set of completed upstream phases for a
/// downstream phase's prompt. Returns an empty string (not an error) when
/// no upstream outputs exist yet — the phase simply runs with no prior
/// context, matching the original's silent-empty behavior.
pub fn assemble_cross_phase(upstream: &[(&str, &PhaseResult)]) -> String {
    if upstream.is_empty() {
        return String::new();
    }
    let mut blocks = Vec::with_capacity(upstream.len());
    for (label, result) in upstream {
        blocks.push(format!(
            "=== Prior phase: {label} ({}) ===\n{}",
            result.phase_name,
            truncate_block(&result.final_output)
        ));
    }
    blocks.join("\n\n")
}

/// Assembles context for a multi-pass engine's Nth pass from its own
/// previous passes within the same phase.
pub fn assemble_inner_pass(prior_passes: &[&str]) -> String {
    if prior_passes.is_empty() {
        return String::new();
    }
    let mut blocks = Vec::with_capacity(prior_passes.len());
    for (i, content) in prior_passes.iter().enumerate() {
        blocks.push(format!("=== Your pass {} ===\n{}", i + 1, truncate_block(content)));
    }
    blocks.join("\n\n")
}

/// Assembles context for one chain step from the step(s) that ran before
/// it in the same chain.
pub fn assemble_chain_step(prior_steps: &[(&str, &str)]) -> String {
    if prior_steps.is_empty() {
        return String::new();
    }
    let mut blocks = Vec::with_capacity(prior_steps.len());
    for (engine_key, content) in prior_steps {
        blocks.push(format!("=== Chain step: {engine_key} ===\n{}", truncate_block(content)));
    }
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::model::PhaseStatus;

    fn result(name: &str, output: &str) -> PhaseResult {
        PhaseResult {
            phase_number: 1.0,
            phase_name: name.to_string(),
            status: PhaseStatus::Completed,
            engine_results: Default::default(),
            work_results: None,
            work_errors: Default::default(),
            final_output: output.to_string(),
            duration_ms: 0,
            total_tokens: 0,
            error: None,
        }
    }

    #[test]
    fn cross_phase_with_no_upstream_is_empty() {
        assert_eq!(assemble_cross_phase(&[]), "");
    }

    #[test]
    fn cross_phase_labels_each_block() {
        let r = result("Corpus survey", "summary text");
        let assembled = assemble_cross_phase(&[("1.0", &r)]);
        assert!(assembled.contains("Prior phase: 1.0"));
        assert!(assembled.contains("summary text"));
    }

    #[test]
    fn truncation_marks_omitted_char_count() {
        let big = "x".repeat(MAX_CHARS_PER_BLOCK + 100);
        let truncated = truncate_block(&big);
        assert!(truncated.contains("100 characters omitted"));
    }

    #[test]
    fn inner_pass_empty_when_no_priors() {
        assert_eq!(assemble_inner_pass(&[]), "");
    }

    #[test]
    fn chain_step_joins_multiple_steps() {
        let assembled = assemble_chain_step(&[("skeptic", "a"), ("advocate", "b")]);
        assert!(assembled.contains("skeptic"));
        assert!(assembled.contains("advocate"));
    }
}
