//! Matching strategies
//!
//! Each strategy looks for an unused persisted annotation for one span.
//! The reconciler runs them in order and stops at the first hit.

use super::MatchKind;
use crate::annotation::PersistedAnnotation;
use crate::extract::RawHighlightSpan;
use std::collections::{HashMap, HashSet};

/// Persisted annotations a span may be matched against, with lookup tables.
///
/// Indexes refer to positions in `annotations`; lower index wins ties.
pub struct Candidates<'a> {
    annotations: Vec<&'a PersistedAnnotation>,
    by_text: HashMap<&'a str, Vec<usize>>,
    buckets: HashMap<usize, Vec<usize>>,
    bucket_size: usize,
}

impl<'a> Candidates<'a> {
    /// Index the non-virtual annotations of `persisted`
    pub fn new(persisted: &'a [PersistedAnnotation], bucket_size: usize) -> Self {
        let bucket_size = bucket_size.max(1);
        let annotations: Vec<&PersistedAnnotation> =
            persisted.iter().filter(|a| !a.is_virtual).collect();

        let mut by_text: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut buckets: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, annotation) in annotations.iter().enumerate() {
            by_text.entry(annotation.text.as_str()).or_default().push(i);
            buckets
                .entry(annotation.position / bucket_size)
                .or_default()
                .push(i);
        }

        Self {
            annotations,
            by_text,
            buckets,
            bucket_size,
        }
    }

    pub fn get(&self, index: usize) -> &'a PersistedAnnotation {
        self.annotations[index]
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a PersistedAnnotation> + '_ {
        self.annotations.iter().copied()
    }

    fn with_text(&self, text: &str) -> &[usize] {
        self.by_text.get(text).map(Vec::as_slice).unwrap_or(&[])
    }

    fn near(&self, position: usize) -> Vec<usize> {
        let bucket = position / self.bucket_size;
        let mut found = Vec::new();
        for b in [bucket.checked_sub(1), Some(bucket), bucket.checked_add(1)]
            .into_iter()
            .flatten()
        {
            if let Some(indexes) = self.buckets.get(&b) {
                found.extend_from_slice(indexes);
            }
        }
        found.sort_unstable();
        found
    }

    fn unused(&self, index: usize, used: &HashSet<String>) -> bool {
        !used.contains(&self.annotations[index].id)
    }

    fn distance(&self, index: usize, span: &RawHighlightSpan) -> usize {
        self.annotations[index].position.abs_diff(span.start_offset)
    }

    /// Closest unused candidate among `indexes`, ties to the lowest index
    fn closest(
        &self,
        indexes: &[usize],
        span: &RawHighlightSpan,
        used: &HashSet<String>,
    ) -> Option<(usize, usize)> {
        indexes
            .iter()
            .copied()
            .filter(|&i| self.unused(i, used))
            .map(|i| (i, self.distance(i, span)))
            .min_by_key(|&(i, distance)| (distance, i))
    }
}

/// One step of the matching cascade
pub trait MatchStrategy: Send + Sync {
    /// Which step this is, reported on merged highlights
    fn kind(&self) -> MatchKind;

    /// Index of the matching candidate, if any
    fn find(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<usize>;
}

/// The span already carries a persisted id
pub struct IdentityMatch;

impl MatchStrategy for IdentityMatch {
    fn kind(&self) -> MatchKind {
        MatchKind::Identity
    }

    fn find(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<usize> {
        let id = span.id.as_deref()?;
        (0..candidates.len()).find(|&i| candidates.get(i).id == id && candidates.unused(i, used))
    }
}

/// Same text, closest position within a tolerance
pub struct TextPositionMatch {
    pub tolerance: usize,
}

impl MatchStrategy for TextPositionMatch {
    fn kind(&self) -> MatchKind {
        MatchKind::TextPosition
    }

    fn find(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<usize> {
        let (index, distance) = candidates.closest(candidates.with_text(&span.text), span, used)?;
        (distance < self.tolerance).then_some(index)
    }
}

/// Exactly one unused annotation has this text, wherever it is
pub struct UniqueTextMatch;

impl MatchStrategy for UniqueTextMatch {
    fn kind(&self) -> MatchKind {
        MatchKind::UniqueText
    }

    fn find(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<usize> {
        let mut unused = candidates
            .with_text(&span.text)
            .iter()
            .copied()
            .filter(|&i| candidates.unused(i, used));

        match (unused.next(), unused.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        }
    }
}

/// Any unused annotation close by, used when the text itself changed
pub struct PositionBucketMatch {
    pub tolerance: usize,
}

impl MatchStrategy for PositionBucketMatch {
    fn kind(&self) -> MatchKind {
        MatchKind::PositionBucket
    }

    fn find(
        &self,
        span: &RawHighlightSpan,
        candidates: &Candidates<'_>,
        used: &HashSet<String>,
    ) -> Option<usize> {
        let nearby = candidates.near(span.start_offset);
        let (index, distance) = candidates.closest(&nearby, span, used)?;
        (distance < self.tolerance).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn persisted(id: &str, text: &str, position: usize) -> PersistedAnnotation {
        PersistedAnnotation {
            id: id.to_string(),
            text: text.to_string(),
            position,
            block_id: None,
            comments: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_virtual: false,
            file_path: "a.md".to_string(),
        }
    }

    fn span(text: &str, start: usize) -> RawHighlightSpan {
        RawHighlightSpan {
            id: None,
            text: text.to_string(),
            start_offset: start,
            span_length: text.len() + 4,
            background_color: None,
            is_cloze_marked: false,
            block_id: None,
            file_path: "a.md".to_string(),
        }
    }

    #[test]
    fn test_identity() {
        let list = vec![persisted("x", "alpha", 0), persisted("y", "beta", 10)];
        let candidates = Candidates::new(&list, 50);
        let mut s = span("changed", 900);
        s.id = Some("y".to_string());

        assert_eq!(IdentityMatch.find(&s, &candidates, &HashSet::new()), Some(1));

        let used: HashSet<String> = ["y".to_string()].into_iter().collect();
        assert_eq!(IdentityMatch.find(&s, &candidates, &used), None);
        assert_eq!(IdentityMatch.find(&span("alpha", 0), &candidates, &HashSet::new()), None);
    }

    #[test]
    fn test_text_position_prefers_closest() {
        let list = vec![
            persisted("far", "alpha", 400),
            persisted("near", "alpha", 130),
            persisted("other", "beta", 140),
        ];
        let candidates = Candidates::new(&list, 50);
        let strategy = TextPositionMatch { tolerance: 500 };

        assert_eq!(strategy.find(&span("alpha", 140), &candidates, &HashSet::new()), Some(1));
        assert_eq!(strategy.find(&span("alpha", 2000), &candidates, &HashSet::new()), None);
    }

    #[test]
    fn test_unique_text_requires_single_unused() {
        let list = vec![persisted("a", "alpha", 0), persisted("b", "alpha", 900)];
        let candidates = Candidates::new(&list, 50);

        assert_eq!(UniqueTextMatch.find(&span("alpha", 5000), &candidates, &HashSet::new()), None);

        let used: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(UniqueTextMatch.find(&span("alpha", 5000), &candidates, &used), Some(1));
    }

    #[test]
    fn test_position_bucket_checks_neighbours() {
        let list = vec![persisted("a", "alpha", 98), persisted("b", "beta", 300)];
        let candidates = Candidates::new(&list, 50);
        let strategy = PositionBucketMatch { tolerance: 50 };

        // bucket 2 vs neighbour bucket 1
        assert_eq!(strategy.find(&span("alhpa", 102), &candidates, &HashSet::new()), Some(0));
        assert_eq!(strategy.find(&span("alhpa", 160), &candidates, &HashSet::new()), None);
    }

    #[test]
    fn test_virtual_annotations_are_not_candidates() {
        let mut v = persisted("v", "", 0);
        v.is_virtual = true;
        let list = vec![v];
        let candidates = Candidates::new(&list, 50);
        assert!(candidates.is_empty());
    }
}
