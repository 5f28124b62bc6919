//! Corpus-wide highlight index
//!
//! This module keeps a searchable view of every merged highlight:
//! - A word → file inverted index over highlight text and comments
//! - A per-file cache of merged highlights
//! - Full builds into fresh structures, swapped in on completion
//! - Incremental per-file updates, queued while a full build runs
//!
//! Every install carries a generation number. A full build that finishes
//! after a newer install is discarded.

mod words;

pub use words::{tokenize, WordIndex};

use crate::error::Result;
use crate::matcher::MergedHighlight;
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Lifecycle state of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Never built
    Unindexed,
    /// A full build is running
    Building,
    Indexed,
    /// Older than the TTL; rebuilt before the next read
    Stale,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Unindexed => write!(f, "unindexed"),
            IndexState::Building => write!(f, "building"),
            IndexState::Indexed => write!(f, "indexed"),
            IndexState::Stale => write!(f, "stale"),
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub state: IndexState,
    pub files: usize,
    pub highlights: usize,
    pub words: usize,
    pub generation: u64,
    pub built_at: Option<DateTime<Utc>>,
}

/// One installed word index + highlight cache pair
#[derive(Debug, Default)]
struct Snapshot {
    words: WordIndex,
    files: BTreeMap<String, Vec<MergedHighlight>>,
    built_at: DateTime<Utc>,
}

impl Snapshot {
    fn install(&mut self, path: &str, highlights: Vec<MergedHighlight>) {
        if highlights.is_empty() {
            self.remove(path);
            return;
        }

        self.words.insert_file(path, highlight_words(&highlights));
        self.files.insert(path.to_string(), highlights);
    }

    fn remove(&mut self, path: &str) {
        self.words.remove_file(path);
        self.files.remove(path);
    }

    fn all(&self) -> Vec<MergedHighlight> {
        self.files.values().flatten().cloned().collect()
    }

    fn search(&self, tokens: &[String]) -> Vec<MergedHighlight> {
        self.words
            .files_matching_all(tokens)
            .iter()
            .filter_map(|path| self.files.get(path))
            .flatten()
            .filter(|h| mentions_all(h, tokens))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingUpdate {
    Update(String),
    Remove(String),
}

#[derive(Debug, Default)]
struct IndexInner {
    snapshot: Option<Snapshot>,
    /// Generation of the installed snapshot
    generation: u64,
    builds_in_flight: usize,
    pending: Vec<PendingUpdate>,
}

/// Words a file contributes: tokens of highlight text and comments
fn highlight_words(highlights: &[MergedHighlight]) -> Vec<String> {
    highlights
        .iter()
        .flat_map(|h| {
            std::iter::once(h.text.as_str()).chain(h.comments.iter().map(|c| c.content.as_str()))
        })
        .flat_map(tokenize)
        .collect()
}

/// Whether a highlight's text or comments contain every token
pub fn mentions_all(highlight: &MergedHighlight, tokens: &[String]) -> bool {
    tokens.iter().all(|token| highlight.mentions(token))
}

/// Filter highlights for `term` without an index
pub fn filter_highlights(highlights: Vec<MergedHighlight>, term: &str) -> Vec<MergedHighlight> {
    if term.trim().is_empty() {
        return highlights;
    }
    let tokens = tokenize(term);
    if tokens.is_empty() {
        return Vec::new();
    }
    highlights
        .into_iter()
        .filter(|h| mentions_all(h, &tokens))
        .collect()
}

/// Searchable index of merged highlights across the corpus
pub struct HighlightIndex {
    pipeline: Arc<Pipeline>,
    ttl: Duration,
    inner: RwLock<IndexInner>,
    next_generation: AtomicU64,
}

impl HighlightIndex {
    pub fn new(pipeline: Arc<Pipeline>, ttl: Duration) -> Self {
        Self {
            pipeline,
            ttl,
            inner: RwLock::new(IndexInner::default()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn take_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    fn is_expired(&self, built_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(built_at);
        age.to_std().map(|age| age >= self.ttl).unwrap_or(false)
    }

    /// Current lifecycle state
    pub async fn state(&self) -> IndexState {
        let inner = self.inner.read().await;
        if inner.builds_in_flight > 0 {
            return IndexState::Building;
        }
        match &inner.snapshot {
            None => IndexState::Unindexed,
            Some(snapshot) if self.is_expired(snapshot.built_at) => IndexState::Stale,
            Some(_) => IndexState::Indexed,
        }
    }

    /// Build the index from every document and swap it in.
    ///
    /// Returns `false` if a newer install superseded this build. A failing
    /// document is skipped; failing to list the corpus keeps the old index.
    pub async fn build_full(&self) -> Result<bool> {
        let generation = {
            let mut inner = self.inner.write().await;
            inner.builds_in_flight += 1;
            self.take_generation()
        };

        tracing::info!("Building highlight index (generation {})", generation);
        let built = self.collect().await;

        let installed = {
            let mut inner = self.inner.write().await;
            inner.builds_in_flight -= 1;

            built.map(|snapshot| Self::swap_in(&mut inner, generation, snapshot))
        };

        self.replay_pending().await;
        installed
    }

    /// Install a full build unless something newer is already installed
    fn swap_in(inner: &mut IndexInner, generation: u64, snapshot: Snapshot) -> bool {
        if generation <= inner.generation {
            tracing::debug!(
                "Discarding superseded build {} (installed {})",
                generation,
                inner.generation
            );
            return false;
        }

        tracing::info!(
            "Indexed {} files, {} words",
            snapshot.files.len(),
            snapshot.words.len()
        );
        inner.snapshot = Some(snapshot);
        inner.generation = generation;
        true
    }

    async fn collect(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot {
            built_at: Utc::now(),
            ..Snapshot::default()
        };

        for path in self.pipeline.documents().await? {
            match self.pipeline.process(&path).await {
                Ok(highlights) => snapshot.install(&path, highlights),
                Err(e) => tracing::warn!("Skipping {} while indexing: {}", path, e),
            }
        }

        Ok(snapshot)
    }

    /// Apply updates queued during a build, once no build is running
    async fn replay_pending(&self) {
        let pending = {
            let mut inner = self.inner.write().await;
            if inner.builds_in_flight > 0 {
                return;
            }
            std::mem::take(&mut inner.pending)
        };

        for update in pending {
            let result = match &update {
                PendingUpdate::Update(path) => self.apply_update(path).await,
                PendingUpdate::Remove(path) => {
                    self.apply_remove(path).await;
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!("Deferred index update failed: {}", e);
            }
        }
    }

    /// Re-index one file after a create or modify.
    ///
    /// Before the first build this runs a full build instead. During a
    /// build the update is queued and replayed afterwards.
    pub async fn update_file(&self, path: &str) -> Result<()> {
        let needs_build = {
            let mut inner = self.inner.write().await;
            if inner.builds_in_flight > 0 {
                inner.pending.push(PendingUpdate::Update(path.to_string()));
                return Ok(());
            }
            inner.snapshot.is_none()
        };

        if needs_build {
            self.build_full().await?;
            return Ok(());
        }

        self.apply_update(path).await
    }

    async fn apply_update(&self, path: &str) -> Result<()> {
        let highlights = self.pipeline.process(path).await?;

        let mut inner = self.inner.write().await;
        if inner.builds_in_flight > 0 {
            inner.pending.push(PendingUpdate::Update(path.to_string()));
            return Ok(());
        }

        let generation = self.take_generation();
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.install(path, highlights);
            inner.generation = generation;
            tracing::debug!("Re-indexed {} (generation {})", path, generation);
        }
        Ok(())
    }

    /// Drop one file from the index after a delete or rename-away
    pub async fn remove_file(&self, path: &str) {
        {
            let mut inner = self.inner.write().await;
            if inner.builds_in_flight > 0 {
                inner.pending.push(PendingUpdate::Remove(path.to_string()));
                return;
            }
        }
        self.apply_remove(path).await;
    }

    async fn apply_remove(&self, path: &str) {
        let mut inner = self.inner.write().await;
        if inner.builds_in_flight > 0 {
            inner.pending.push(PendingUpdate::Remove(path.to_string()));
            return;
        }

        let generation = self.take_generation();
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.remove(path);
            inner.generation = generation;
        }
    }

    /// Rebuild first if the installed index has expired
    async fn refresh_if_stale(&self) {
        if self.state().await != IndexState::Stale {
            return;
        }

        tracing::info!("Highlight index expired, rebuilding");
        if let Err(e) = self.build_full().await {
            tracing::warn!("Rebuilding expired index failed: {}", e);
        }
    }

    /// Every indexed highlight, or `None` before the first build
    pub async fn get_all(&self) -> Option<Vec<MergedHighlight>> {
        self.refresh_if_stale().await;
        let inner = self.inner.read().await;
        inner.snapshot.as_ref().map(Snapshot::all)
    }

    /// Indexed highlights of one file, or `None` before the first build
    pub async fn get_file(&self, path: &str) -> Option<Vec<MergedHighlight>> {
        self.refresh_if_stale().await;
        let inner = self.inner.read().await;
        let snapshot = inner.snapshot.as_ref()?;
        Some(snapshot.files.get(path).cloned().unwrap_or_default())
    }

    /// Highlights whose text or comments contain every token of `term`.
    ///
    /// An empty term returns everything. `None` before the first build.
    pub async fn search(&self, term: &str) -> Option<Vec<MergedHighlight>> {
        self.refresh_if_stale().await;
        let inner = self.inner.read().await;
        let snapshot = inner.snapshot.as_ref()?;

        if term.trim().is_empty() {
            return Some(snapshot.all());
        }

        let tokens = tokenize(term);
        if tokens.is_empty() {
            return Some(Vec::new());
        }
        Some(snapshot.search(&tokens))
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state().await;
        let inner = self.inner.read().await;
        match &inner.snapshot {
            Some(snapshot) => IndexStats {
                state,
                files: snapshot.files.len(),
                highlights: snapshot.files.values().map(Vec::len).sum(),
                words: snapshot.words.len(),
                generation: inner.generation,
                built_at: Some(snapshot.built_at),
            },
            None => IndexStats {
                state,
                files: 0,
                highlights: 0,
                words: 0,
                generation: inner.generation,
                built_at: None,
            },
        }
    }
}
