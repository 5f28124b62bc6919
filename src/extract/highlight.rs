//! Highlight extraction from raw document text
//!
//! Runs every enabled rule over the document and keeps matches that:
//! - are not inside code blocks or inline code
//! - are not `==` matches glued to extra `=` characters
//! - do not duplicate an already accepted span

use super::regions::{block_id_for_line, code_regions, in_regions};
use super::rules::{CompiledRule, HighlightRule};
use super::RawHighlightSpan;
use once_cell::sync::Lazy;
use regex::Regex;

static INLINE_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)background(?:-color)?\s*:\s*([^;"'>]+)"#).expect("valid color pattern")
});

static CLOZE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}]+\}\}").expect("valid cloze pattern"));

/// Extracts highlight spans from document text
pub struct HighlightExtractor {
    rules: Vec<CompiledRule>,
    /// Spans with equal text closer than this are the same physical highlight
    dedup_tolerance: usize,
}

impl HighlightExtractor {
    /// Create an extractor with only the built-in rule
    pub fn new() -> Self {
        Self::with_rules(&[])
    }

    /// Create an extractor with the built-in rule followed by `user_rules`
    pub fn with_rules(user_rules: &[HighlightRule]) -> Self {
        let mut rules = vec![HighlightRule::builtin()];
        rules.extend(user_rules.iter().cloned());

        Self {
            rules: CompiledRule::compile_all(&rules),
            dedup_tolerance: 10,
        }
    }

    /// Set the de-duplication tolerance (in bytes)
    pub fn with_dedup_tolerance(mut self, tolerance: usize) -> Self {
        self.dedup_tolerance = tolerance;
        self
    }

    /// Number of rules that compiled and are enabled
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Extract highlight spans, ordered by start offset
    pub fn extract(&self, content: &str, file_path: &str) -> Vec<RawHighlightSpan> {
        if content.is_empty() {
            return Vec::new();
        }

        let regions = code_regions(content);
        let mut accepted: Vec<RawHighlightSpan> = Vec::new();

        for rule in &self.rules {
            for caps in rule.regex.captures_iter(content) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                if whole.as_str().is_empty() {
                    continue;
                }

                if rule.guard_equals && touches_extra_equals(content, whole.start(), whole.end())
                {
                    continue;
                }

                if in_regions(&regions, whole.start()) {
                    continue;
                }

                let text = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .find(|m| !m.as_str().is_empty())
                    .map(|m| m.as_str())
                    .unwrap_or(whole.as_str());

                if text.trim().is_empty() || self.is_duplicate(&accepted, text, whole.start()) {
                    continue;
                }

                let background_color = inline_color(whole.as_str()).or_else(|| rule.color.clone());

                accepted.push(RawHighlightSpan {
                    id: None,
                    text: text.to_string(),
                    start_offset: whole.start(),
                    span_length: whole.len(),
                    background_color,
                    is_cloze_marked: CLOZE_MARKER.is_match(text),
                    block_id: block_id_for_line(content, whole.end()),
                    file_path: file_path.to_string(),
                });
            }
        }

        accepted.sort_by(|a, b| {
            a.start_offset
                .cmp(&b.start_offset)
                .then_with(|| a.text.cmp(&b.text))
        });

        tracing::trace!("Extracted {} highlights from {}", accepted.len(), file_path);
        accepted
    }

    fn is_duplicate(&self, accepted: &[RawHighlightSpan], text: &str, start: usize) -> bool {
        accepted
            .iter()
            .any(|span| span.text == text && span.start_offset.abs_diff(start) < self.dedup_tolerance)
    }
}

impl Default for HighlightExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// `===x===` or `a==b==c=` style matches are not highlights
fn touches_extra_equals(content: &str, start: usize, end: usize) -> bool {
    let bytes = content.as_bytes();
    (start > 0 && bytes[start - 1] == b'=') || bytes.get(end) == Some(&b'=')
}

/// Color from an inline `style="background: ..."` attribute
fn inline_color(markup: &str) -> Option<String> {
    if !markup.contains("style") {
        return None;
    }
    INLINE_COLOR
        .captures(markup)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|color| !color.is_empty())
}
