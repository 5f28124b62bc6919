//! Structural regions of a Markdown document
//!
//! Highlights inside fenced/indented code blocks or inline code spans are
//! not real highlights. The outline comes from pulldown-cmark offsets.

use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Parser, Tag};
use regex::Regex;
use std::ops::Range;

static BLOCK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)\^([A-Za-z0-9-]+)\s*$").expect("valid block id pattern"));

/// Byte ranges of code blocks and inline code, in document order
pub fn code_regions(content: &str) -> Vec<Range<usize>> {
    let mut regions = Vec::new();

    for (event, range) in Parser::new(content).into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(_)) => regions.push(range),
            Event::Code(_) => regions.push(range),
            _ => {}
        }
    }

    regions.sort_by_key(|r| r.start);
    regions
}

/// Check whether an offset falls inside any region
pub fn in_regions(regions: &[Range<usize>], offset: usize) -> bool {
    // regions are sorted by start; find the last one starting at or before offset
    let idx = regions.partition_point(|r| r.start <= offset);
    regions[..idx].iter().rev().any(|r| r.contains(&offset))
}

/// Block id (`^id`) at the end of the line containing `offset`
pub fn block_id_for_line(content: &str, offset: usize) -> Option<String> {
    let offset = offset.min(content.len());
    let line_start = content[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = content[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(content.len());

    BLOCK_ID
        .captures(&content[line_start..line_end])
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
