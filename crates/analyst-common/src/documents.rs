//! Corpus document entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded source document. Content is stored inline (TEXT column) per
/// the original store's design — no blob store, no external object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub content_type: String,
    pub char_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(document_id: String, title: String, content: String) -> Self {
        let char_count = content.chars().count();
        Self {
            document_id,
            title,
            content,
            content_type: "text/plain".to_string(),
            char_count,
            created_at: Utc::now(),
        }
    }
}
