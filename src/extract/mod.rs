//! Highlight extraction module
//!
//! This module turns raw document text into highlight spans:
//! - Rule-driven matching (`==text==` plus user-defined patterns)
//! - Exclusion of spans inside code blocks and inline code
//! - A small content cache keyed by path and modification time

mod cache;
mod highlight;
mod regions;
mod rules;

pub use cache::ContentCache;
pub use highlight::HighlightExtractor;
pub use regions::{block_id_for_line, code_regions};
pub use rules::{CompiledRule, HighlightRule, DEFAULT_RULE_NAME};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute a stable hash for content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable annotation id derived from where a highlight was first seen.
pub fn annotation_id(file_path: &str, start_offset: usize, text: &str) -> String {
    let hash = content_hash(&format!("{}:{}:{}", file_path, start_offset, text));
    hash[..16].to_string()
}

/// Id of the file-level (virtual) annotation for a document.
pub fn virtual_annotation_id(file_path: &str) -> String {
    let hash = content_hash(&format!("{}:virtual", file_path));
    hash[..16].to_string()
}

/// A highlighted region found in document text.
///
/// Spans are recomputed on every extraction pass and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHighlightSpan {
    /// Identity carried over from a previously merged highlight, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Highlighted text (first non-empty capture group)
    pub text: String,
    /// Byte offset of the whole match
    pub start_offset: usize,
    /// Byte length of the whole match
    pub span_length: usize,
    /// Resolved display color
    pub background_color: Option<String>,
    /// Whether the text contains a `{{...}}` cloze marker
    pub is_cloze_marked: bool,
    /// Trailing `^block-id` on the span's line
    pub block_id: Option<String>,
    /// Document path relative to the corpus root
    pub file_path: String,
}

impl RawHighlightSpan {
    /// Byte offset one past the end of the match
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.span_length
    }
}
