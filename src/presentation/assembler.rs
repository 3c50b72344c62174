//! Arranges rendered sections into the parent/child view tree a client
//! renders directly: each node carries its own content (or a per-work map
//! of content), sorted by `position`, nested under `parent_view_key`.

use std::collections::{HashMap, HashSet};

use analyst_common::registry::ViewDefinition;

use crate::db::Database;
use crate::errors::PhaseError;
use crate::presentation::bridge::RenderedSection;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ViewPayload {
    pub view_key: String,
    pub title: String,
    pub renderer_type: String,
    pub renderer_config: serde_json::Value,
    pub visible: bool,
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_work_content: HashMap<String, String>,
    pub children: Vec<ViewPayload>,
}

/// Builds the top-level forest of view payloads (roots have no
/// `parent_view_key`), recursively nesting children under their parent.
///
/// In `slim` mode every node's prose is dropped (renderer metadata and tree
/// shape survive) — used for index/navigation responses that shouldn't ship
/// the full analysis text.
pub fn assemble(views: &[ViewDefinition], sections: &[RenderedSection], slim: bool) -> Vec<ViewPayload> {
    let mut by_view: HashMap<&str, Vec<&RenderedSection>> = HashMap::new();
    for section in sections {
        by_view.entry(section.view_key.as_str()).or_default().push(section);
    }

    let mut roots: Vec<ViewPayload> = views
        .iter()
        .filter(|v| v.parent_view_key.is_none())
        .map(|v| build_node(v, views, &by_view, slim))
        .collect();
    roots.sort_by_key(|p| p.position);
    roots
}

fn build_node(
    view: &ViewDefinition,
    all_views: &[ViewDefinition],
    by_view: &HashMap<&str, Vec<&RenderedSection>>,
    slim: bool,
) -> ViewPayload {
    let mut content = None;
    let mut per_work_content = HashMap::new();

    if !slim {
        if let Some(sections) = by_view.get(view.view_key.as_str()) {
            if view.per_work {
                for section in sections {
                    if let Some(work_key) = &section.work_key {
                        per_work_content.insert(work_key.clone(), section.rendered.clone());
                    }
                }
            } else if let Some(section) = sections.first() {
                content = Some(section.rendered.clone());
            }
        }
    }

    let mut children: Vec<ViewPayload> = all_views
        .iter()
        .filter(|v| v.parent_view_key.as_deref() == Some(view.view_key.as_str()))
        .map(|v| build_node(v, all_views, by_view, slim))
        .collect();
    children.sort_by_key(|c| c.position);

    ViewPayload {
        view_key: view.view_key.clone(),
        title: view.title.clone(),
        renderer_type: view.renderer_type.clone(),
        renderer_config: view.renderer_config.clone(),
        visible: view.visible,
        position: view.position,
        content,
        per_work_content,
        children,
    }
}

/// Chapter-targeted phases don't always have a registered view — the
/// catalog is authored ahead of time and can't predict how many chapters a
/// document will split into. This synthesizes one payload per phase whose
/// outputs exist but whose (phase, engine) pair no static view claims.
pub fn synthesize_unclaimed_chapter_payloads(
    db: &Database,
    job_id: &str,
    phase_numbers: &[f64],
    claimed: &HashSet<(String, String)>,
) -> Result<Vec<ViewPayload>, PhaseError> {
    let mut extra = Vec::new();
    for &phase_number in phase_numbers {
        let outputs = db.get_outputs_for_phase(job_id, phase_number).map_err(PhaseError::Other)?;
        let mut by_engine: HashMap<String, Vec<&analyst_common::model::PhaseOutput>> = HashMap::new();
        for output in &outputs {
            if output.work_key.starts_with("chapter-") {
                by_engine.entry(output.engine_key.clone()).or_default().push(output);
            }
        }

        for (engine_key, items) in by_engine {
            if claimed.contains(&(phase_number.to_string(), engine_key.clone())) {
                continue;
            }
            let mut per_work_content = HashMap::new();
            for item in items {
                per_work_content.insert(item.work_key.clone(), item.content.clone());
            }
            extra.push(ViewPayload {
                view_key: format!("auto:{phase_number}:{engine_key}"),
                title: format!("{engine_key} (by chapter)"),
                renderer_type: "prose_by_work".to_string(),
                renderer_config: serde_json::Value::Null,
                visible: true,
                position: u32::MAX,
                content: None,
                per_work_content,
                children: Vec::new(),
            });
        }
    }
    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(key: &str, parent: Option<&str>, position: u32, per_work: bool) -> ViewDefinition {
        ViewDefinition {
            view_key: key.to_string(),
            title: key.to_string(),
            description: String::new(),
            renderer_type: "markdown".to_string(),
            renderer_config: serde_json::Value::Null,
            source: analyst_common::registry::ViewSource::Engine { phase_number: 1.0, engine_key: "e".into() },
            transformation_type: analyst_common::registry::TransformationType::Passthrough,
            per_work,
            visible: true,
            position,
            parent_view_key: parent.map(|s| s.to_string()),
        }
    }

    #[test]
    fn nests_children_under_parent_sorted_by_position() {
        let views = vec![view("root", None, 0, false), view("child-b", Some("root"), 2, false), view("child-a", Some("root"), 1, false)];
        let roots = assemble(&views, &[], false);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children[0].view_key, "child-a");
        assert_eq!(roots[0].children[1].view_key, "child-b");
    }

    #[test]
    fn slim_mode_omits_content() {
        let views = vec![view("root", None, 0, false)];
        let sections = vec![RenderedSection {
            view_key: "root".to_string(),
            work_key: None,
            section_key: "dyn:e:markdown".to_string(),
            rendered: "prose".to_string(),
        }];
        let roots = assemble(&views, &sections, true);
        assert!(roots[0].content.is_none());
    }

    #[test]
    fn per_work_view_collects_into_map() {
        let views = vec![view("root", None, 0, true)];
        let sections = vec![
            RenderedSection { view_key: "root".into(), work_key: Some("w1".into()), section_key: "s".into(), rendered: "a".into() },
            RenderedSection { view_key: "root".into(), work_key: Some("w2".into()), section_key: "s".into(), rendered: "b".into() },
        ];
        let roots = assemble(&views, &sections, false);
        assert_eq!(roots[0].per_work_content.get("w1"), Some(&"a".to_string()));
        assert_eq!(roots[0].per_work_content.get("w2"), Some(&"b".to_string()));
    }
}
