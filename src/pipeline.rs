//! Per-file highlight pipeline
//!
//! read (through the content cache) → extract → load persisted annotations
//! → merge → schedule drift correction → prune orphans

use crate::annotation::{AnnotationRepository, ReferenceGuard};
use crate::config::Config;
use crate::corpus::Corpus;
use crate::error::Result;
use crate::extract::{ContentCache, HighlightExtractor, RawHighlightSpan};
use crate::matcher::{DriftCorrector, MergedHighlight, Reconciler};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Turns documents into merged highlights
pub struct Pipeline {
    corpus: Arc<dyn Corpus>,
    cache: ContentCache,
    extractor: HighlightExtractor,
    repo: Arc<AnnotationRepository>,
    reconciler: Reconciler,
    drift: DriftCorrector,
    guard: Arc<dyn ReferenceGuard>,
}

impl Pipeline {
    pub fn new(
        corpus: Arc<dyn Corpus>,
        repo: Arc<AnnotationRepository>,
        guard: Arc<dyn ReferenceGuard>,
        config: &Config,
    ) -> Self {
        let extractor = HighlightExtractor::with_rules(&config.rules)
            .with_dedup_tolerance(config.matching.dedup_tolerance);

        Self {
            corpus,
            cache: ContentCache::new(config.content_cache_capacity),
            extractor,
            reconciler: Reconciler::with_config(config.matching),
            drift: DriftCorrector::new(repo.clone(), config.drift_correction_delay()),
            repo,
            guard,
        }
    }

    pub fn repo(&self) -> &Arc<AnnotationRepository> {
        &self.repo
    }

    pub fn corpus(&self) -> &Arc<dyn Corpus> {
        &self.corpus
    }

    /// Paths of every tracked document
    pub async fn documents(&self) -> Result<Vec<String>> {
        Ok(self
            .corpus
            .list_documents()
            .await?
            .into_iter()
            .map(|d| d.path)
            .collect())
    }

    /// Document content, or `None` if the document is gone
    pub async fn read(&self, path: &str) -> Result<Option<Arc<str>>> {
        let Some(meta) = self.corpus.stat(path).await? else {
            return Ok(None);
        };

        if let Some(content) = self.cache.get(path, meta.modified) {
            tracing::trace!("Content cache hit for {}", path);
            return Ok(Some(content));
        }

        let content: Arc<str> = Arc::from(self.corpus.read(path).await?);
        self.cache.insert(path, meta.modified, Arc::clone(&content));
        Ok(Some(content))
    }

    /// Extracted spans for a document
    pub async fn spans(&self, path: &str) -> Result<Vec<RawHighlightSpan>> {
        Ok(match self.read(path).await? {
            Some(content) => self.extractor.extract(&content, path),
            None => Vec::new(),
        })
    }

    /// Merged highlights for one document.
    ///
    /// Drift corrections are written back later; orphaned annotations are
    /// pruned before returning. A missing document yields nothing and
    /// leaves its annotations alone.
    pub async fn process(&self, path: &str) -> Result<Vec<MergedHighlight>> {
        let Some(content) = self.read(path).await? else {
            return Ok(Vec::new());
        };

        let spans = self.extractor.extract(&content, path);
        let persisted = self.repo.get_file_highlights(path).await?;
        let outcome = self.reconciler.merge(&spans, &persisted);

        self.drift.schedule(path, outcome.corrections);

        if !outcome.orphans.is_empty() {
            match self
                .repo
                .prune(path, &outcome.orphans, self.guard.as_ref())
                .await
            {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Pruned {} orphaned annotations in {}", removed, path),
                Err(e) => tracing::warn!("Failed to prune orphans in {}: {}", path, e),
            }
        }

        Ok(outcome.highlights)
    }

    /// Process every document, skipping the ones that fail
    pub async fn scan_all(&self) -> Result<BTreeMap<String, Vec<MergedHighlight>>> {
        let mut files = BTreeMap::new();

        for path in self.documents().await? {
            match self.process(&path).await {
                Ok(highlights) if highlights.is_empty() => {}
                Ok(highlights) => {
                    files.insert(path, highlights);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path, e),
            }
        }

        Ok(files)
    }

    /// Wait for scheduled drift corrections to be written
    pub async fn flush(&self) {
        self.drift.flush().await;
    }

    /// Forget cached content for a document
    pub fn invalidate(&self, path: &str) {
        self.cache.invalidate(path);
    }

    pub fn reference_guard(&self) -> &dyn ReferenceGuard {
        self.guard.as_ref()
    }
}
