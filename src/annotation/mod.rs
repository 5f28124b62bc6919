//! Persisted annotations and their comments
//!
//! An annotation pairs highlighted text with user comments and a stable id.
//! Annotations are the system of record; highlight spans are not.

mod repository;

pub use repository::AnnotationRepository;

use crate::extract::{annotation_id, virtual_annotation_id, RawHighlightSpan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A user comment attached to an annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<String>,
}

impl Comment {
    /// Create a new comment
    pub fn new(content: &str, author: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            author: author.map(|a| a.to_string()),
        }
    }
}

/// A persisted annotation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAnnotation {
    /// Stable id, see [`annotation_id`]
    pub id: String,
    /// Highlighted text when the annotation was created
    pub text: String,
    /// Last known byte offset of the highlight
    pub position: usize,
    /// Structural anchor independent of offsets
    #[serde(default)]
    pub block_id: Option<String>,
    /// Comments, oldest first
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// File-level annotation not tied to a span
    #[serde(default)]
    pub is_virtual: bool,
    pub file_path: String,
}

impl PersistedAnnotation {
    /// Create an annotation for a highlight span
    pub fn from_span(span: &RawHighlightSpan) -> Self {
        let now = Utc::now();
        let id = span
            .id
            .clone()
            .unwrap_or_else(|| annotation_id(&span.file_path, span.start_offset, &span.text));

        Self {
            id,
            text: span.text.clone(),
            position: span.start_offset,
            block_id: span.block_id.clone(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            is_virtual: false,
            file_path: span.file_path.clone(),
        }
    }

    /// Create the file-level annotation for `file_path`
    pub fn new_virtual(file_path: &str) -> Self {
        let now = Utc::now();
        Self {
            id: virtual_annotation_id(file_path),
            text: String::new(),
            position: 0,
            block_id: None,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            is_virtual: true,
            file_path: file_path.to_string(),
        }
    }

    /// No comments and not file-level: a candidate for pruning
    pub fn is_orphaned(&self) -> bool {
        !self.is_virtual && self.comments.is_empty()
    }

    /// Find a comment by id
    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// New position for an annotation whose highlight moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionCorrection {
    pub id: String,
    pub position: usize,
}

/// Something outside the engine that may still hold annotation ids
/// (flashcards, for example). Referenced annotations are never pruned.
pub trait ReferenceGuard: Send + Sync {
    fn is_referenced(&self, annotation_id: &str) -> bool;
}

/// Guard for setups with no external references
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl ReferenceGuard for NoReferences {
    fn is_referenced(&self, _annotation_id: &str) -> bool {
        false
    }
}

impl ReferenceGuard for HashSet<String> {
    fn is_referenced(&self, annotation_id: &str) -> bool {
        self.contains(annotation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, start: usize) -> RawHighlightSpan {
        RawHighlightSpan {
            id: None,
            text: text.to_string(),
            start_offset: start,
            span_length: text.len() + 4,
            background_color: None,
            is_cloze_marked: false,
            block_id: Some("b1".to_string()),
            file_path: "a.md".to_string(),
        }
    }

    #[test]
    fn test_from_span() {
        let annotation = PersistedAnnotation::from_span(&span("alpha", 4));
        assert_eq!(annotation.id, annotation_id("a.md", 4, "alpha"));
        assert_eq!(annotation.position, 4);
        assert_eq!(annotation.block_id.as_deref(), Some("b1"));
        assert!(annotation.is_orphaned());
    }

    #[test]
    fn test_from_span_keeps_carried_id() {
        let mut s = span("alpha", 40);
        s.id = Some("existing".to_string());
        assert_eq!(PersistedAnnotation::from_span(&s).id, "existing");
    }

    #[test]
    fn test_virtual_is_never_orphaned() {
        let annotation = PersistedAnnotation::new_virtual("a.md");
        assert!(annotation.is_virtual);
        assert!(!annotation.is_orphaned());
        assert_eq!(annotation.id, virtual_annotation_id("a.md"));
    }

    #[test]
    fn test_reference_guards() {
        assert!(!NoReferences.is_referenced("x"));
        let refs: HashSet<String> = ["x".to_string()].into_iter().collect();
        assert!(refs.is_referenced("x"));
        assert!(!refs.is_referenced("y"));
    }
}
