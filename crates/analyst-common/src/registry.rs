//! Catalog entity types: engines, stances, and chapter-detection results.
//!
//! These are the read-only building blocks a plan's phases reference by key
//! (`engine_key`, `stance_key`, `chain_key`). The catalog itself is loaded
//! and validated by the root crate; this module only defines the shapes.

use serde::{Deserialize, Serialize};

/// A reusable LLM capability: a system prompt plus its default model choice.
/// Distinct from a `ChainDefinition`, which sequences several engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEngine {
    pub engine_key: String,
    pub display_name: String,
    pub system_prompt: String,
    pub default_model: String,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default)]
    pub default_passes: u32,
}

/// An analytical posture an engine can be run under (e.g. "skeptic",
/// "advocate"), layered onto the engine's base system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stance {
    pub stance_key: String,
    pub description: String,
    pub prompt_fragment: String,
}

/// Where a view's source data comes from: a single engine within a phase, or
/// a chain's combined output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ViewSource {
    Engine { phase_number: f64, engine_key: String },
    Chain { phase_number: f64, chain_key: String },
}

/// How the transformation executor should turn raw prose into the shape a
/// renderer wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    None,
    Passthrough,
    SchemaRename,
    LlmExtract,
    LlmSummarize,
    GroupAggregate,
}

/// A presentation view the assembler can produce: its data source, how raw
/// prose becomes structured data, and where it sits in the view tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub view_key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub renderer_type: String,
    #[serde(default)]
    pub renderer_config: serde_json::Value,
    pub source: ViewSource,
    #[serde(default)]
    pub transformation_type: TransformationType,
    #[serde(default)]
    pub per_work: bool,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub parent_view_key: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Default for TransformationType {
    fn default() -> Self {
        TransformationType::None
    }
}

/// A cross-reference problem found while validating a loaded catalog: a
/// chain step names an engine or stance that isn't registered. Surfaced as a
/// warning, never a load-time failure (spec.md §9 open question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceWarning {
    pub chain_key: String,
    pub missing_kind: MissingReferenceKind,
    pub missing_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReferenceKind {
    Engine,
    Stance,
}

/// One chapter/section detected in a document by the chapter splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub index: usize,
    pub title: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub char_count: usize,
}

/// The full split result for one document: chapters in document order plus
/// which detection strategy produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub document_id: String,
    pub chapters: Vec<ChapterInfo>,
    pub detection_strategy: DetectionStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    Structured,
    AllCapsFallback,
    WholeDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_warning_carries_missing_key() {
        let w = ReferenceWarning {
            chain_key: "c1".into(),
            missing_kind: MissingReferenceKind::Engine,
            missing_key: "ghost-engine".into(),
        };
        assert_eq!(w.missing_kind, MissingReferenceKind::Engine);
        assert_eq!(w.missing_key, "ghost-engine");
    }

    #[test]
    fn chapter_info_tracks_offsets() {
        let c = ChapterInfo {
            index: 0,
            title: "Chapter 1".into(),
            start_offset: 0,
            end_offset: 2500,
            char_count: 2500,
        };
        assert!(c.end_offset > c.start_offset);
    }
}
