//! Splits a document into chapters/sections for chapter-targeted phases.
//!
//! Direct port of `original_source/src/executor/chapter_splitter.py`: five
//! structural regexes tried first; if fewer than three matches come back,
//! an ALL-CAPS heading fallback is tried; if that still doesn't produce
//! enough structure, the whole document is treated as a single chapter.

use analyst_common::registry::{ChapterInfo, DetectionStrategy, DocumentStructure};
use regex::Regex;

const MIN_CHAPTER_CHARS: usize = 2000;
const DEDUP_WINDOW_CHARS: usize = 100;
const MIN_STRUCTURED_MATCHES: usize = 3;

fn structured_patterns() -> Vec<Regex> {
    vec![
        Regex::new(r"(?m)^Chapter\s+\d+[:.]?\s*.*$").unwrap(),
        Regex::new(r"(?m)^CHAPTER\s+[IVXLCDM]+[:.]?\s*.*$").unwrap(),
        Regex::new(r"(?m)^Part\s+(One|Two|Three|Four|Five|[IVXLCDM]+|\d+)[:.]?\s*.*$").unwrap(),
        Regex::new(r"(?m)^\d+\.\s+[A-Z][^\n]{0,100}$").unwrap(),
        Regex::new(r"(?m)^#{1,3}\s+.+$").unwrap(),
    ]
}

fn all_caps_pattern() -> Regex {
    Regex::new(r"(?m)^[A-Z][A-Z0-9 \-:']{4,80}$").unwrap()
}

struct RawMatch {
    offset: usize,
    title: String,
}

fn find_matches(content: &str, pattern: &Regex) -> Vec<RawMatch> {
    pattern
        .find_iter(content)
        .map(|m| RawMatch { offset: m.start(), title: m.as_str().trim().to_string() })
        .collect()
}

fn dedup(mut matches: Vec<RawMatch>) -> Vec<RawMatch> {
    matches.sort_by_key(|m| m.offset);
    let mut out: Vec<RawMatch> = Vec::with_capacity(matches.len());
    for m in matches {
        if let Some(last) = out.last() {
            if m.offset.saturating_sub(last.offset) < DEDUP_WINDOW_CHARS {
                continue;
            }
        }
        out.push(m);
    }
    out
}

fn build_chapters(content: &str, matches: Vec<RawMatch>) -> Vec<ChapterInfo> {
    let total = content.len();
    let mut chapters = Vec::with_capacity(matches.len());
    for (i, m) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|n| n.offset).unwrap_or(total);
        let char_count = end.saturating_sub(m.offset);
        // The final chapter is exempt from the minimum-size filter: a short
        // epilogue/appendix is still a real chapter, not noise.
        if char_count < MIN_CHAPTER_CHARS && i + 1 != matches.len() {
            continue;
        }
        chapters.push(ChapterInfo {
            index: chapters.len(),
            title: m.title.clone(),
            start_offset: m.offset,
            end_offset: end,
            char_count,
        });
    }
    chapters
}

pub fn split_document(document_id: &str, content: &str) -> DocumentStructure {
    for pattern in structured_patterns() {
        let matches = dedup(find_matches(content, &pattern));
        if matches.len() >= MIN_STRUCTURED_MATCHES {
            let chapters = build_chapters(content, matches);
            if !chapters.is_empty() {
                return DocumentStructure {
                    document_id: document_id.to_string(),
                    chapters,
                    detection_strategy: DetectionStrategy::Structured,
                };
            }
        }
    }

    let all_caps = dedup(find_matches(content, &all_caps_pattern()));
    if all_caps.len() >= MIN_STRUCTURED_MATCHES {
        let chapters = build_chapters(content, all_caps);
        if !chapters.is_empty() {
            return DocumentStructure {
                document_id: document_id.to_string(),
                chapters,
                detection_strategy: DetectionStrategy::AllCapsFallback,
            };
        }
    }

    DocumentStructure {
        document_id: document_id.to_string(),
        chapters: vec![ChapterInfo {
            index: 0,
            title: "Whole document".to_string(),
            start_offset: 0,
            end_offset: content.len(),
            char_count: content.len(),
        }],
        detection_strategy: DetectionStrategy::WholeDocument,
    }
}
