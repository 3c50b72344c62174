//! Read-only catalog: engines, stances, chains, views, and the default
//! workflow's phase list. Loaded once at startup from YAML files under the
//! configured catalog directory, following the `PhasesFile`
//! load-then-validate pattern `src/phase.rs` used for its JSON phase file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use analyst_common::plan::{ChainDefinition, PhaseExecutionSpec};
use analyst_common::registry::{CapabilityEngine, MissingReferenceKind, ReferenceWarning, Stance, ViewDefinition};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub engines: Vec<CapabilityEngine>,
    #[serde(default)]
    pub stances: Vec<Stance>,
    #[serde(default)]
    pub chains: Vec<ChainDefinition>,
    #[serde(default)]
    pub views: Vec<ViewDefinition>,
    #[serde(default)]
    pub default_workflow: Vec<PhaseExecutionSpec>,
}

pub struct Registries {
    catalog: CatalogFile,
}

impl Registries {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("catalog.yaml");
        let catalog = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read catalog at {}", path.display()))?;
            serde_yaml::from_str(&raw).context("failed to parse catalog.yaml")?
        } else {
            CatalogFile::default()
        };
        Ok(Self { catalog })
    }

    pub fn from_catalog(catalog: CatalogFile) -> Self {
        Self { catalog }
    }

    pub fn engine(&self, engine_key: &str) -> Option<&CapabilityEngine> {
        self.catalog.engines.iter().find(|e| e.engine_key == engine_key)
    }

    pub fn stance(&self, stance_key: &str) -> Option<&Stance> {
        self.catalog.stances.iter().find(|s| s.stance_key == stance_key)
    }

    pub fn chain(&self, chain_key: &str) -> Option<&ChainDefinition> {
        self.catalog.chains.iter().find(|c| c.chain_key == chain_key)
    }

    pub fn chains(&self) -> &[ChainDefinition] {
        &self.catalog.chains
    }

    pub fn engines(&self) -> &[CapabilityEngine] {
        &self.catalog.engines
    }

    pub fn stances(&self) -> &[Stance] {
        &self.catalog.stances
    }

    pub fn views(&self) -> &[ViewDefinition] {
        &self.catalog.views
    }

    pub fn default_workflow_phases(&self) -> Vec<PhaseExecutionSpec> {
        self.catalog.default_workflow.clone()
    }

    /// Health check: every chain step must reference a registered engine and
    /// (if set) a registered stance. Never fails the load — a missing
    /// reference is a warning a phase runner degrades gracefully around,
    /// not a startup panic.
    pub fn validate_references(&self) -> Vec<ReferenceWarning> {
        let mut warnings = Vec::new();
        for chain in &self.catalog.chains {
            for step in &chain.steps {
                if self.engine(&step.engine_key).is_none() {
                    warnings.push(ReferenceWarning {
                        chain_key: chain.chain_key.clone(),
                        missing_kind: MissingReferenceKind::Engine,
                        missing_key: step.engine_key.clone(),
                    });
                }
                if let Some(stance_key) = &step.stance_key {
                    if self.stance(stance_key).is_none() {
                        warnings.push(ReferenceWarning {
                            chain_key: chain.chain_key.clone(),
                            missing_kind: MissingReferenceKind::Stance,
                            missing_key: stance_key.clone(),
                        });
                    }
                }
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::plan::ChainStep;

    fn sample_catalog() -> CatalogFile {
        CatalogFile {
            engines: vec![CapabilityEngine {
                engine_key: "skeptic".into(),
                display_name: "Skeptic".into(),
                system_prompt: "Be skeptical.".into(),
                default_model: "claude-sonnet-4".into(),
                supports_thinking: false,
                default_passes: 1,
            }],
            stances: vec![],
            chains: vec![ChainDefinition {
                chain_key: "main".into(),
                steps: vec![
                    ChainStep { engine_key: "skeptic".into(), stance_key: None, role: None },
                    ChainStep { engine_key: "ghost".into(), stance_key: Some("missing-stance".into()), role: None },
                ],
                blend_mode: Default::default(),
            }],
            views: vec![],
            default_workflow: vec![],
        }
    }

    #[test]
    fn validate_references_reports_missing_engine_and_stance() {
        let registries = Registries::from_catalog(sample_catalog());
        let warnings = registries.validate_references();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.missing_kind == MissingReferenceKind::Engine && w.missing_key == "ghost"));
        assert!(warnings.iter().any(|w| w.missing_kind == MissingReferenceKind::Stance));
    }

    #[test]
    fn engine_and_chain_lookups_work() {
        let registries = Registries::from_catalog(sample_catalog());
        assert!(registries.engine("skeptic").is_some());
        assert!(registries.engine("nonexistent").is_none());
        assert!(registries.chain("main").is_some());
    }
}
