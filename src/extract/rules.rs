//! Highlight matching rules
//!
//! The built-in rule matches `==text==`. User rules are appended after it
//! and may carry a display color.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Name of the built-in `==text==` rule
pub const DEFAULT_RULE_NAME: &str = "markdown-highlight";

const DEFAULT_PATTERN: &str = r"==([^=\n](?:[^\n]*?[^=\n])?)==";

/// A user-configurable highlight rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightRule {
    /// Rule name, used in logs
    pub name: String,
    /// Regular expression; the first non-empty capture group is the text
    pub pattern: String,
    /// Display color for matches of this rule
    #[serde(default)]
    pub color: Option<String>,
    /// Disabled rules are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl HighlightRule {
    /// Create an enabled rule without a color
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            color: None,
            enabled: true,
        }
    }

    /// Set the display color
    pub fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    /// The built-in `==text==` rule
    pub fn builtin() -> Self {
        Self::new(DEFAULT_RULE_NAME, DEFAULT_PATTERN)
    }

    /// Compile the pattern
    pub fn compile(&self) -> Result<CompiledRule> {
        let regex = Regex::new(&self.pattern).map_err(|e| Error::InvalidRule {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(CompiledRule {
            name: self.name.clone(),
            regex,
            color: self.color.clone(),
            guard_equals: self.pattern.starts_with("=="),
        })
    }
}

/// A rule ready for matching
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub regex: Regex,
    pub color: Option<String>,
    /// Reject matches touching extra `=` characters
    pub guard_equals: bool,
}

impl CompiledRule {
    /// Compile the enabled rules in order, skipping any that fail.
    pub fn compile_all(rules: &[HighlightRule]) -> Vec<CompiledRule> {
        rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match rule.compile() {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    tracing::warn!("Skipping highlight rule: {}", e);
                    None
                }
            })
            .collect()
    }
}
