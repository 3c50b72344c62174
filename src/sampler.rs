//! Produces a lightweight classification profile for one document by
//! sampling a representative excerpt and asking a fast model to tag it.
//! Never a fatal error: any LLM failure falls back to a minimal default
//! profile so a broken classification call can't sink plan synthesis.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, LlmRequest};

const HEAD_CHARS: usize = 5000;
const MID_CHARS: usize = 5000;
const TAIL_CHARS: usize = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub genre: String,
    pub domain: String,
    pub argumentative_style: String,
    pub technical_level: String,
    pub reasoning_mode_tags: Vec<String>,
    pub key_vocabulary: Vec<String>,
    pub structural_notes: String,
    pub engine_affinity: HashMap<String, f64>,
}

impl Default for DocumentProfile {
    fn default() -> Self {
        Self {
            genre: "unknown".to_string(),
            domain: "general".to_string(),
            argumentative_style: "unknown".to_string(),
            technical_level: "unknown".to_string(),
            reasoning_mode_tags: Vec::new(),
            key_vocabulary: Vec::new(),
            structural_notes: String::new(),
            engine_affinity: HashMap::new(),
        }
    }
}

fn excerpt(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();

    let head: String = chars.iter().take(HEAD_CHARS).collect();
    let tail: String = if len > TAIL_CHARS {
        chars[len - TAIL_CHARS..].iter().collect()
    } else {
        String::new()
    };
    let mid: String = if len > HEAD_CHARS + TAIL_CHARS {
        let mid_start = len / 2 - MID_CHARS / 2;
        let mid_end = (mid_start + MID_CHARS).min(len);
        chars[mid_start..mid_end].iter().collect()
    } else {
        String::new()
    };

    let headings: Vec<&str> = content
        .lines()
        .filter(|line| line.starts_with('#') || line.trim().starts_with("Chapter"))
        .take(20)
        .collect();

    format!(
        "--- Beginning ---\n{head}\n\n--- Middle ---\n{mid}\n\n--- End ---\n{tail}\n\n--- Detected headings ---\n{}",
        headings.join("\n")
    )
}

pub async fn classify_document(client: &LlmClient, fast_model: &str, content: &str) -> DocumentProfile {
    let prompt = format!(
        "Classify this document excerpt. Respond with JSON matching: \
         {{\"genre\":\"\",\"domain\":\"\",\"argumentative_style\":\"\",\"technical_level\":\"\",\
         \"reasoning_mode_tags\":[],\"key_vocabulary\":[],\"structural_notes\":\"\",\"engine_affinity\":{{}}}}\n\n{}",
        excerpt(content)
    );

    let request = LlmRequest {
        model: fast_model.to_string(),
        system_prompt: "You classify documents for an analysis pipeline. Respond with JSON only.".to_string(),
        user_prompt: prompt,
        max_tokens: 1024,
        allow_thinking: false,
    };

    match client.call(&request).await {
        Ok(response) => serde_json::from_str(&response.content).unwrap_or_default(),
        Err(err) => {
            tracing::warn!(error = %err, "document classification failed, using default profile");
            DocumentProfile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_includes_all_three_sections_for_long_documents() {
        let content = format!("{}{}{}", "A".repeat(6000), "B".repeat(6000), "C".repeat(6000));
        let sampled = excerpt(&content);
        assert!(sampled.contains("Beginning"));
        assert!(sampled.contains("Middle"));
        assert!(sampled.contains("End"));
    }

    #[test]
    fn excerpt_handles_short_documents_without_panicking() {
        let sampled = excerpt("short doc");
        assert!(sampled.contains("short doc"));
    }

    #[test]
    fn default_profile_has_unknown_placeholders() {
        let profile = DocumentProfile::default();
        assert_eq!(profile.genre, "unknown");
        assert!(profile.engine_affinity.is_empty());
    }
}
