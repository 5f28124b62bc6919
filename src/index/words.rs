//! Keyword tokenization and the word → file inverted index

use std::collections::{BTreeMap, BTreeSet};

/// Shortest token kept, in characters
const MIN_TOKEN_CHARS: usize = 2;

/// Split text into lower-case search tokens.
///
/// Whitespace-separated, with leading and trailing punctuation stripped.
/// Tokens shorter than two characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
        .map(|word| word.to_lowercase())
        .collect()
}

/// Inverted index from word to the files containing it
#[derive(Debug, Clone, Default)]
pub struct WordIndex {
    words: BTreeMap<String, BTreeSet<String>>,
    by_file: BTreeMap<String, BTreeSet<String>>,
}

impl WordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `words` as contributed by `file`, replacing earlier contributions
    pub fn insert_file<I>(&mut self, file: &str, words: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.remove_file(file);

        let words: BTreeSet<String> = words.into_iter().collect();
        if words.is_empty() {
            return;
        }

        for word in &words {
            self.words
                .entry(word.clone())
                .or_default()
                .insert(file.to_string());
        }
        self.by_file.insert(file.to_string(), words);
    }

    /// Drop every contribution of `file`, deleting emptied word buckets
    pub fn remove_file(&mut self, file: &str) {
        let Some(words) = self.by_file.remove(file) else {
            return;
        };

        for word in words {
            if let Some(files) = self.words.get_mut(&word) {
                files.remove(file);
                if files.is_empty() {
                    self.words.remove(&word);
                }
            }
        }
    }

    /// Files containing a word that has `token` as a substring
    pub fn files_matching(&self, token: &str) -> BTreeSet<String> {
        self.words
            .iter()
            .filter(|(word, _)| word.contains(token))
            .flat_map(|(_, files)| files.iter().cloned())
            .collect()
    }

    /// Files containing every token, each through some word
    pub fn files_matching_all(&self, tokens: &[String]) -> BTreeSet<String> {
        let mut tokens = tokens.iter();
        let Some(first) = tokens.next() else {
            return BTreeSet::new();
        };

        let mut files = self.files_matching(first);
        for token in tokens {
            if files.is_empty() {
                break;
            }
            let next = self.files_matching(token);
            files.retain(|f| next.contains(f));
        }
        files
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains_word(&self, word: &str) -> bool {
        self.words.contains_key(word)
    }
}
