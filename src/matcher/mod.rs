//! Reconciliation of extracted highlights with persisted annotations
//!
//! Highlight spans are recomputed from text on every pass; annotations are
//! durable. The reconciler re-attaches each span to at most one annotation
//! using an ordered cascade of strategies:
//! - identity (the span already carries an annotation id)
//! - same text at the closest position within a tolerance
//! - the only unused annotation with the same text
//! - any unused annotation at a nearby position

mod drift;
mod strategies;

pub use drift::DriftCorrector;
pub use strategies::{
    Candidates, IdentityMatch, MatchStrategy, PositionBucketMatch, TextPositionMatch,
    UniqueTextMatch,
};

use crate::annotation::{Comment, PersistedAnnotation, PositionCorrection};
use crate::extract::{annotation_id, content_hash, RawHighlightSpan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Which cascade step attached an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Identity,
    TextPosition,
    UniqueText,
    PositionBucket,
    /// File-level annotation with no span
    Virtual,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKind::Identity => write!(f, "identity"),
            MatchKind::TextPosition => write!(f, "text+position"),
            MatchKind::UniqueText => write!(f, "unique-text"),
            MatchKind::PositionBucket => write!(f, "position"),
            MatchKind::Virtual => write!(f, "virtual"),
        }
    }
}

/// A highlight as seen by callers: span fields plus annotation data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedHighlight {
    /// Annotation id if matched, otherwise an ephemeral id
    pub id: String,
    pub text: String,
    pub start_offset: usize,
    pub span_length: usize,
    pub background_color: Option<String>,
    pub is_cloze_marked: bool,
    pub block_id: Option<String>,
    pub file_path: String,
    /// File stem of `file_path`
    pub file_name: String,
    pub comments: Vec<Comment>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_virtual: bool,
    /// `None` for highlights without an annotation
    pub matched_by: Option<MatchKind>,
}

impl MergedHighlight {
    fn unmatched(span: &RawHighlightSpan, id: String) -> Self {
        Self {
            id,
            text: span.text.clone(),
            start_offset: span.start_offset,
            span_length: span.span_length,
            background_color: span.background_color.clone(),
            is_cloze_marked: span.is_cloze_marked,
            block_id: span.block_id.clone(),
            file_path: span.file_path.clone(),
            file_name: file_name(&span.file_path),
            comments: Vec::new(),
            created_at: None,
            updated_at: None,
            is_virtual: false,
            matched_by: None,
        }
    }

    fn matched(span: &RawHighlightSpan, annotation: &PersistedAnnotation, kind: MatchKind) -> Self {
        Self {
            id: annotation.id.clone(),
            comments: annotation.comments.clone(),
            created_at: Some(annotation.created_at),
            updated_at: Some(annotation.updated_at),
            block_id: span.block_id.clone().or_else(|| annotation.block_id.clone()),
            matched_by: Some(kind),
            ..Self::unmatched(span, String::new())
        }
    }

    fn from_virtual(annotation: &PersistedAnnotation) -> Self {
        Self {
            id: annotation.id.clone(),
            text: annotation.text.clone(),
            start_offset: 0,
            span_length: 0,
            background_color: None,
            is_cloze_marked: false,
            block_id: annotation.block_id.clone(),
            file_path: annotation.file_path.clone(),
            file_name: file_name(&annotation.file_path),
            comments: annotation.comments.clone(),
            created_at: Some(annotation.created_at),
            updated_at: Some(annotation.updated_at),
            is_virtual: true,
            matched_by: Some(MatchKind::Virtual),
        }
    }

    /// Whether an annotation backs this highlight
    pub fn is_matched(&self) -> bool {
        self.matched_by.is_some()
    }

    /// Span view of this highlight, carrying its id for identity matching
    pub fn as_span(&self) -> RawHighlightSpan {
        RawHighlightSpan {
            id: Some(self.id.clone()),
            text: self.text.clone(),
            start_offset: self.start_offset,
            span_length: self.span_length,
            background_color: self.background_color.clone(),
            is_cloze_marked: self.is_cloze_marked,
            block_id: self.block_id.clone(),
            file_path: self.file_path.clone(),
        }
    }

    /// Whether the text or any comment contains `needle` (already lower-case)
    pub fn mentions(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(needle)
            || self
                .comments
                .iter()
                .any(|c| c.content.to_lowercase().contains(needle))
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Span highlights in span order, then virtual highlights
    pub highlights: Vec<MergedHighlight>,
    /// Annotations matched at a new position
    pub corrections: Vec<PositionCorrection>,
    /// Unmatched annotations with no comments
    pub orphans: Vec<String>,
}

/// Tolerances for the matching cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Maximum distance for a same-text match
    #[serde(default = "default_text_position_tolerance")]
    pub text_position_tolerance: usize,
    /// Maximum distance for a position-only match
    #[serde(default = "default_fuzzy_position_tolerance")]
    pub fuzzy_position_tolerance: usize,
    /// Width of the position buckets
    #[serde(default = "default_bucket_size")]
    pub bucket_size: usize,
    /// Same-text spans closer than this are de-duplicated during extraction
    #[serde(default = "default_dedup_tolerance")]
    pub dedup_tolerance: usize,
}

fn default_text_position_tolerance() -> usize {
    500
}

fn default_fuzzy_position_tolerance() -> usize {
    50
}

fn default_bucket_size() -> usize {
    50
}

fn default_dedup_tolerance() -> usize {
    10
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            text_position_tolerance: default_text_position_tolerance(),
            fuzzy_position_tolerance: default_fuzzy_position_tolerance(),
            bucket_size: default_bucket_size(),
            dedup_tolerance: default_dedup_tolerance(),
        }
    }
}

/// Matches extracted spans to persisted annotations
pub struct Reconciler {
    strategies: Vec<Box<dyn MatchStrategy>>,
    bucket_size: usize,
}

impl Reconciler {
    /// Create a reconciler with default tolerances
    pub fn new() -> Self {
        Self::with_config(MatchConfig::default())
    }

    /// Create with custom tolerances
    pub fn with_config(config: MatchConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(IdentityMatch),
                Box::new(TextPositionMatch {
                    tolerance: config.text_position_tolerance,
                }),
                Box::new(UniqueTextMatch),
                Box::new(PositionBucketMatch {
                    tolerance: config.fuzzy_position_tolerance,
                }),
            ],
            bucket_size: config.bucket_size,
        }
    }

    /// Create with an explicit strategy list
    pub fn with_strategies(strategies: Vec<Box<dyn MatchStrategy>>, bucket_size: usize) -> Self {
        Self {
            strategies,
            bucket_size,
        }
    }

    /// Merge spans with the persisted annotations of one file
    pub fn merge(
        &self,
        spans: &[RawHighlightSpan],
        persisted: &[PersistedAnnotation],
    ) -> MergeOutcome {
        let candidates = Candidates::new(persisted, self.bucket_size);
        let known_ids: HashSet<&str> = persisted.iter().map(|a| a.id.as_str()).collect();
        let mut used: HashSet<String> = HashSet::new();
        let mut outcome = MergeOutcome::default();

        for span in spans {
            match self.cascade(span, &candidates, &used) {
                Some((index, kind)) => {
                    let annotation = candidates.get(index);
                    used.insert(annotation.id.clone());

                    if annotation.position != span.start_offset {
                        outcome.corrections.push(PositionCorrection {
                            id: annotation.id.clone(),
                            position: span.start_offset,
                        });
                    }

                    outcome
                        .highlights
                        .push(MergedHighlight::matched(span, annotation, kind));
                }
                None => {
                    let id = ephemeral_id(span, &known_ids);
                    outcome.highlights.push(MergedHighlight::unmatched(span, id));
                }
            }
        }

        for annotation in persisted {
            if annotation.is_virtual
                && !annotation.comments.is_empty()
                && !used.contains(&annotation.id)
            {
                outcome
                    .highlights
                    .push(MergedHighlight::from_virtual(annotation));
            }
        }

        outcome.orphans = candidates
            .iter()
            .filter(|a| !used.contains(&a.id) && a.is_orphaned())
            .map(|a| a.id.clone())
            .collect();

        outcome
    }

    /// Best annotation for a single span, ignoring every other span
    pub fn find_best_match<'a>(
        &self,
        span: &RawHighlightSpan,
        persisted: &'a [PersistedAnnotation],
    ) -> Option<&'a PersistedAnnotation> {
        let candidates = Candidates::new(persisted, self.bucket_size);
        self.cascade(span, &candidates, &HashSet::new())
            .map(|(index, _)| candidates.get(index))
    }

    fn cascade(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<(usize, MatchKind)> {
        if candidates.is_empty() {
            return None;
        }

        self.strategies.iter().find_map(|strategy| {
            strategy
                .find(span, candidates, used)
                .map(|index| (index, strategy.kind()))
        })
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Id for a span no annotation claimed.
///
/// Deterministic, and never equal to an id already present in the file.
fn ephemeral_id(span: &RawHighlightSpan, known_ids: &HashSet<&str>) -> String {
    if let Some(id) = &span.id {
        if !known_ids.contains(id.as_str()) {
            return id.clone();
        }
    }

    let id = annotation_id(&span.file_path, span.start_offset, &span.text);
    if !known_ids.contains(id.as_str()) {
        return id;
    }

    let hash = content_hash(&format!(
        "{}:{}:{}:ephemeral",
        span.file_path, span.start_offset, span.text
    ));
    hash[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HighlightExtractor;

    fn persisted(text: &str, position: usize, comments: &[&str]) -> PersistedAnnotation {
        let mut annotation = PersistedAnnotation::from_span(&RawHighlightSpan {
            id: None,
            text: text.to_string(),
            start_offset: position,
            span_length: text.len() + 4,
            background_color: None,
            is_cloze_marked: false,
            block_id: None,
            file_path: "a.md".to_string(),
        });
        annotation.comments = comments.iter().map(|c| Comment::new(c, None)).collect();
        annotation
    }

    fn extract(content: &str) -> Vec<RawHighlightSpan> {
        HighlightExtractor::new().extract(content, "a.md")
    }

    #[test]
    fn test_merge_scenario() {
        let spans = extract("see ==alpha== and ==beta==");
        let note = persisted("alpha", 4, &["note"]);

        let outcome = Reconciler::new().merge(&spans, &[note.clone()]);

        assert_eq!(outcome.highlights.len(), 2);
        let alpha = &outcome.highlights[0];
        assert_eq!(alpha.id, note.id);
        assert_eq!(alpha.comments[0].content, "note");
        assert_eq!(alpha.matched_by, Some(MatchKind::TextPosition));
        assert_eq!(alpha.file_name, "a");

        let beta = &outcome.highlights[1];
        assert!(beta.comments.is_empty());
        assert!(!beta.is_matched());
        assert_eq!(beta.id, annotation_id("a.md", 18, "beta"));

        assert!(outcome.corrections.is_empty());
        assert!(outcome.orphans.is_empty());
    }

    #[test]
    fn test_drift_tolerance() {
        let content = format!("{}==alpha== tail", "x".repeat(140));
        let spans = extract(&content);
        assert_eq!(spans[0].start_offset, 140);

        let note = persisted("alpha", 100, &["note"]);
        let outcome = Reconciler::new().merge(&spans, &[note.clone()]);

        assert_eq!(outcome.highlights[0].id, note.id);
        assert_eq!(outcome.highlights[0].matched_by, Some(MatchKind::TextPosition));
        assert_eq!(
            outcome.corrections,
            vec![PositionCorrection {
                id: note.id.clone(),
                position: 140
            }]
        );
    }

    #[test]
    fn test_ambiguity_fallback() {
        let content = format!(
            "==alpha== {} ==alpha== {}",
            "a".repeat(2000),
            "b".repeat(10)
        );
        let spans = extract(&content);
        assert_eq!(spans.len(), 2);

        let note = persisted("alpha", 9000, &["note"]);
        let outcome = Reconciler::new().merge(&spans, &[note.clone()]);

        assert_eq!(outcome.highlights[0].id, note.id);
        assert_eq!(outcome.highlights[0].matched_by, Some(MatchKind::UniqueText));
        assert!(!outcome.highlights[1].is_matched());
        assert_ne!(outcome.highlights[1].id, note.id);
    }

    #[test]
    fn test_no_double_assignment_with_duplicates() {
        let content = format!("==alpha== {} ==alpha==", "-".repeat(40));
        let spans = extract(&content);
        let first = persisted("alpha", 0, &["one"]);
        let second = persisted("alpha", 50, &["two"]);

        let outcome = Reconciler::new().merge(&spans, &[second.clone(), first.clone()]);
        let ids: Vec<&str> = outcome.highlights.iter().map(|h| h.id.as_str()).collect();

        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);
    }

    #[test]
    fn test_ephemeral_id_avoids_used_ids() {
        // a new highlight inserted before the annotated one steals it by proximity
        let content = "==alpha== ==alpha== and more text".to_string();
        let spans: Vec<RawHighlightSpan> = HighlightExtractor::new()
            .with_dedup_tolerance(0)
            .extract(&content, "a.md");
        assert_eq!(spans.len(), 2);

        let note = persisted("alpha", 10, &["note"]);
        let outcome = Reconciler::new().merge(&spans, &[note.clone()]);

        let ids: HashSet<&str> = outcome.highlights.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(outcome.highlights[0].id, note.id);
    }

    #[test]
    fn test_position_bucket_when_text_changed() {
        let spans = extract("intro ==alphas== end");
        let note = persisted("alpha", 8, &["note"]);

        let outcome = Reconciler::new().merge(&spans, &[note.clone()]);
        assert_eq!(outcome.highlights[0].id, note.id);
        assert_eq!(outcome.highlights[0].matched_by, Some(MatchKind::PositionBucket));
        assert_eq!(outcome.highlights[0].text, "alphas");
    }

    #[test]
    fn test_identity_round_trip() {
        let spans = extract("==alpha==");
        let note = persisted("alpha", 0, &["note"]);
        let merged = Reconciler::new().merge(&spans, &[note.clone()]);

        let mut moved = merged.highlights[0].as_span();
        moved.start_offset = 4000;
        moved.text = "rewritten".to_string();

        let found = Reconciler::new().find_best_match(&moved, std::slice::from_ref(&note));
        assert_eq!(found.map(|a| a.id.as_str()), Some(note.id.as_str()));
    }

    #[test]
    fn test_virtual_and_orphans() {
        let spans = extract("==alpha==");
        let mut file_note = PersistedAnnotation::new_virtual("a.md");
        file_note.comments.push(Comment::new("about the file", None));
        let empty_virtual = PersistedAnnotation::new_virtual("a.md");
        let orphan = persisted("gone", 5000, &[]);
        let lost_comment = persisted("lost", 9000, &["keep me"]);

        let outcome = Reconciler::new().merge(
            &spans,
            &[orphan.clone(), file_note.clone(), lost_comment, empty_virtual],
        );

        assert_eq!(outcome.highlights.len(), 2);
        assert!(outcome.highlights[1].is_virtual);
        assert_eq!(outcome.highlights[1].id, file_note.id);
        assert_eq!(outcome.orphans, vec![orphan.id]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let content = "==a1== ==b2== text ==c3== ==a1==";
        let spans = extract(content);
        let list = vec![
            persisted("a1", 0, &["x"]),
            persisted("c3", 19, &["y"]),
            persisted("zz", 7, &["z"]),
        ];

        let reconciler = Reconciler::new();
        let first = reconciler.merge(&spans, &list);
        for _ in 0..5 {
            assert_eq!(reconciler.merge(&spans, &list).highlights, first.highlights);
        }
    }

    #[test]
    fn test_custom_strategy_list() {
        let reconciler = Reconciler::with_strategies(vec![Box::new(UniqueTextMatch)], 50);
        let spans = extract("==alpha==");
        let note = persisted("alpha", 9999, &[]);
        let outcome = reconciler.merge(&spans, &[note.clone()]);
        assert_eq!(outcome.highlights[0].matched_by, Some(MatchKind::UniqueText));
    }
}
