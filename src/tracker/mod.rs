//! Highlight tracker
//!
//! The entry point embedding applications use. It owns the pipeline, the
//! index and the event queue, and exposes:
//! - `initialize`/`destroy` lifecycle with a deferred first build
//! - highlight listing and search, with a full-scan fallback
//! - comment operations that keep the index in step

mod events;

pub use events::{apply_event, EventQueue};

use crate::annotation::{AnnotationRepository, PersistedAnnotation, ReferenceGuard};
use crate::config::Config;
use crate::corpus::{Corpus, FileEvent};
use crate::error::{Error, Result};
use crate::extract::RawHighlightSpan;
use crate::index::{filter_highlights, HighlightIndex, IndexState, IndexStats};
use crate::matcher::MergedHighlight;
use crate::pipeline::Pipeline;
use crate::storage::AnnotationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Running {
    queue: EventQueue,
    startup: JoinHandle<()>,
}

/// Tracks highlights and their annotations across a corpus
pub struct HighlightTracker {
    pipeline: Arc<Pipeline>,
    index: Arc<HighlightIndex>,
    startup_delay: Duration,
    running: Mutex<Option<Running>>,
}

impl HighlightTracker {
    /// Create a tracker. Nothing runs until [`initialize`](Self::initialize).
    pub fn new(
        corpus: Arc<dyn Corpus>,
        store: Arc<dyn AnnotationStore>,
        guard: Arc<dyn ReferenceGuard>,
        config: &Config,
    ) -> Self {
        let repo = Arc::new(AnnotationRepository::new(store));
        let pipeline = Arc::new(Pipeline::new(corpus, repo, guard, config));
        let index = Arc::new(HighlightIndex::new(pipeline.clone(), config.index.ttl()));

        Self {
            pipeline,
            index,
            startup_delay: config.index.startup_delay(),
            running: Mutex::new(None),
        }
    }

    /// Override the delay before the first full build
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn repo(&self) -> &Arc<AnnotationRepository> {
        self.pipeline.repo()
    }

    /// Start the event worker and schedule the first full build
    pub async fn initialize(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let queue = EventQueue::spawn(self.index.clone(), self.pipeline.clone());

        let index = self.index.clone();
        let delay = self.startup_delay;
        let startup = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if index.state().await != IndexState::Unindexed {
                return;
            }
            if let Err(e) = index.build_full().await {
                tracing::warn!("Initial index build failed: {}", e);
            }
        });

        tracing::info!("Highlight tracker started, indexing in {:?}", delay);
        *running = Some(Running { queue, startup });
    }

    /// Stop the event worker after draining queued events.
    ///
    /// A first build still waiting on its startup delay is cancelled.
    ///
    /// Pending drift corrections are written before returning.
    pub async fn destroy(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.startup.abort();
            running.queue.close().await;
            tracing::info!("Highlight tracker stopped");
        }

        self.flush().await;
    }

    /// Wait for background writes started by earlier reads
    pub async fn flush(&self) {
        self.pipeline.flush().await;
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Report a file change.
    ///
    /// Queued when running, applied immediately otherwise.
    pub async fn notify(&self, event: FileEvent) -> Result<()> {
        {
            let running = self.running.lock().await;
            if let Some(running) = running.as_ref() {
                if running.queue.send(event) {
                    return Ok(());
                }
                return Err(Error::Watch("event queue closed".to_string()));
            }
        }

        apply_event(&self.index, &self.pipeline, &event).await
    }

    /// Build the index now
    pub async fn build_index(&self) -> Result<IndexStats> {
        self.index.build_full().await?;
        Ok(self.index.stats().await)
    }

    pub async fn index_state(&self) -> IndexState {
        self.index.state().await
    }

    pub async fn index_stats(&self) -> IndexStats {
        self.index.stats().await
    }

    /// Every highlight, or `None` if the index is not built yet
    pub async fn get_all_highlights(&self) -> Option<Vec<MergedHighlight>> {
        self.index.get_all().await
    }

    /// Every highlight, scanning the corpus if the index is not built yet
    pub async fn get_all_highlights_or_scan(&self) -> Result<Vec<MergedHighlight>> {
        if let Some(all) = self.index.get_all().await {
            return Ok(all);
        }

        tracing::debug!("Index unavailable, scanning corpus");
        self.scan().await
    }

    /// Search highlight text and comments, scanning if the index is not built yet
    pub async fn search(&self, term: &str) -> Result<Vec<MergedHighlight>> {
        if let Some(found) = self.index.search(term).await {
            return Ok(found);
        }

        tracing::debug!("Index unavailable, searching by full scan");
        Ok(filter_highlights(self.scan().await?, term))
    }

    /// Search through the index only
    pub async fn search_indexed(&self, term: &str) -> Result<Vec<MergedHighlight>> {
        self.index.search(term).await.ok_or(Error::IndexUnavailable)
    }

    async fn scan(&self) -> Result<Vec<MergedHighlight>> {
        Ok(self
            .pipeline
            .scan_all()
            .await?
            .into_values()
            .flatten()
            .collect())
    }

    /// Merged highlights of one file
    pub async fn get_file_highlights(&self, path: &str) -> Result<Vec<MergedHighlight>> {
        match self.index.get_file(path).await {
            Some(highlights) => Ok(highlights),
            None => self.pipeline.process(path).await,
        }
    }

    /// Drop every cached view of a file and re-merge it
    pub async fn invalidate(&self, path: &str) {
        self.pipeline.invalidate(path);
        self.pipeline.repo().invalidate(path).await;
        self.refresh(path).await;
    }

    /// Re-index one file after its annotations changed.
    ///
    /// While running, the update goes through the event queue behind any
    /// changes already queued for the file.
    async fn refresh(&self, path: &str) {
        if self.index.state().await == IndexState::Unindexed {
            return;
        }

        {
            let running = self.running.lock().await;
            if let Some(running) = running.as_ref() {
                if running.queue.send(FileEvent::Modified(path.to_string())) {
                    return;
                }
                tracing::warn!("Event queue closed, refreshing {} directly", path);
            }
        }

        if let Err(e) = self.index.update_file(path).await {
            tracing::warn!("Failed to refresh index for {}: {}", path, e);
        }
    }

    /// Comment on a highlight, creating its annotation if needed
    pub async fn add_comment(
        &self,
        highlight: &RawHighlightSpan,
        content: &str,
        author: Option<&str>,
    ) -> Result<PersistedAnnotation> {
        let annotation = self
            .pipeline
            .repo()
            .add_comment(highlight, content, author)
            .await?;
        self.refresh(&highlight.file_path).await;
        Ok(annotation)
    }

    /// Comment on a whole file
    pub async fn add_file_comment(
        &self,
        path: &str,
        content: &str,
        author: Option<&str>,
    ) -> Result<PersistedAnnotation> {
        let annotation = self
            .pipeline
            .repo()
            .add_file_comment(path, content, author)
            .await?;
        self.refresh(path).await;
        Ok(annotation)
    }

    pub async fn update_comment(
        &self,
        path: &str,
        annotation_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<PersistedAnnotation> {
        let annotation = self
            .pipeline
            .repo()
            .update_comment(path, annotation_id, comment_id, content)
            .await?;
        self.refresh(path).await;
        Ok(annotation)
    }

    /// Delete a comment; see [`AnnotationRepository::delete_comment`]
    pub async fn delete_comment(
        &self,
        path: &str,
        annotation_id: &str,
        comment_id: &str,
    ) -> Result<Option<PersistedAnnotation>> {
        let remaining = self
            .pipeline
            .repo()
            .delete_comment(
                path,
                annotation_id,
                comment_id,
                self.pipeline.reference_guard(),
            )
            .await?;
        self.refresh(path).await;
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::NoReferences;
    use crate::corpus::MemoryCorpus;
    use crate::storage::MemoryStore;
    use std::collections::HashSet;

    fn tracker_with(
        guard: Arc<dyn ReferenceGuard>,
    ) -> (Arc<MemoryCorpus>, Arc<MemoryStore>, HighlightTracker) {
        let corpus = Arc::new(MemoryCorpus::new());
        let store = Arc::new(MemoryStore::new());
        let tracker = HighlightTracker::new(corpus.clone(), store.clone(), guard, &Config::default())
            .with_startup_delay(Duration::from_millis(10));
        (corpus, store, tracker)
    }

    fn tracker() -> (Arc<MemoryCorpus>, Arc<MemoryStore>, HighlightTracker) {
        tracker_with(Arc::new(NoReferences))
    }

    async fn wait_for_index(tracker: &HighlightTracker) {
        for _ in 0..100 {
            if tracker.index_state().await == IndexState::Indexed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("index never built");
    }

    #[tokio::test]
    async fn test_fallback_before_index() {
        let (corpus, _, tracker) = tracker();
        corpus.put("a.md", "==alpha== ==beta==");

        assert!(tracker.get_all_highlights().await.is_none());
        assert_eq!(tracker.get_all_highlights_or_scan().await.unwrap().len(), 2);
        assert_eq!(tracker.search("bet").await.unwrap().len(), 1);
        assert!(matches!(
            tracker.search_indexed("bet").await,
            Err(Error::IndexUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (corpus, _, tracker) = tracker();
        corpus.put("a.md", "==alpha==");

        tracker.initialize().await;
        assert!(tracker.is_running().await);
        wait_for_index(&tracker).await;
        assert_eq!(tracker.get_all_highlights().await.unwrap().len(), 1);

        corpus.put("b.md", "==beta==");
        tracker.notify(FileEvent::Created("b.md".into())).await.unwrap();
        tracker.destroy().await;
        assert!(!tracker.is_running().await);

        assert_eq!(tracker.get_all_highlights().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_destroy_cancels_pending_build() {
        let (corpus, _, tracker) = tracker();
        corpus.put("a.md", "==alpha==");
        let tracker = tracker.with_startup_delay(Duration::from_secs(60));

        tracker.initialize().await;
        tracker.destroy().await;
        assert_eq!(tracker.index_state().await, IndexState::Unindexed);
    }

    #[tokio::test]
    async fn test_comment_updates_index() {
        let (corpus, store, tracker) = tracker();
        corpus.put("a.md", "see ==alpha== and ==beta==");
        tracker.build_index().await.unwrap();

        let beta = tracker.get_file_highlights("a.md").await.unwrap()[1].clone();
        let annotation = tracker
            .add_comment(&beta.as_span(), "second letter", Some("me"))
            .await
            .unwrap();
        assert_eq!(annotation.id, beta.id);
        assert!(store.read("a.md").await.unwrap().is_some());

        let found = tracker.search("second").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "beta");

        let comment_id = annotation.comments[0].id.clone();
        tracker
            .update_comment("a.md", &annotation.id, &comment_id, "greek letter")
            .await
            .unwrap();
        assert!(tracker.search("second").await.unwrap().is_empty());
        assert_eq!(tracker.search("greek").await.unwrap().len(), 1);

        let remaining = tracker
            .delete_comment("a.md", &annotation.id, &comment_id)
            .await
            .unwrap();
        assert!(remaining.is_none());
        assert!(tracker.search("greek").await.unwrap().is_empty());
        assert!(store.read("a.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_comment_refresh_is_queued_while_running() {
        let (corpus, _, tracker) = tracker();
        corpus.put("a.md", "see ==alpha==");
        tracker.initialize().await;
        wait_for_index(&tracker).await;

        let alpha = tracker.get_file_highlights("a.md").await.unwrap()[0].clone();
        corpus.put("a.md", "see ==alpha== and ==omega==");
        tracker.notify(FileEvent::Modified("a.md".into())).await.unwrap();
        tracker
            .add_comment(&alpha.as_span(), "first letter", None)
            .await
            .unwrap();
        tracker.destroy().await;

        let all = tracker.get_all_highlights().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].comments[0].content, "first letter");
        assert_eq!(tracker.search("first").await.unwrap().len(), 1);
        assert_eq!(tracker.search("omega").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_flushes_drift() {
        let (corpus, store, tracker) = tracker();
        corpus.put("a.md", "==alpha==");
        let alpha = tracker.get_file_highlights("a.md").await.unwrap()[0].clone();
        tracker.add_comment(&alpha.as_span(), "note", None).await.unwrap();

        corpus.put("a.md", "some inserted prefix ==alpha==");
        tracker.get_file_highlights("a.md").await.unwrap();
        tracker.destroy().await;

        let stored = store.read("a.md").await.unwrap().unwrap();
        assert_eq!(stored[0].position, 21);
    }

    #[tokio::test]
    async fn test_delete_comment_honors_guard() {
        let corpus = Arc::new(MemoryCorpus::new());
        corpus.put("a.md", "==alpha==");
        let store = Arc::new(MemoryStore::new());
        let spans = crate::extract::HighlightExtractor::new().extract("==alpha==", "a.md");
        let id = crate::extract::annotation_id("a.md", 0, "alpha");
        let guard: HashSet<String> = [id.clone()].into_iter().collect();
        let tracker = HighlightTracker::new(corpus, store, Arc::new(guard), &Config::default());

        let annotation = tracker.add_comment(&spans[0], "card", None).await.unwrap();
        let remaining = tracker
            .delete_comment("a.md", &id, &annotation.comments[0].id)
            .await
            .unwrap();

        assert!(remaining.is_some());
        let highlights = tracker.get_file_highlights("a.md").await.unwrap();
        assert_eq!(highlights[0].id, id);
        assert!(highlights[0].is_matched());
    }

    #[tokio::test]
    async fn test_file_comment_is_listed() {
        let (corpus, _, tracker) = tracker();
        corpus.put("a.md", "no highlights");
        tracker.build_index().await.unwrap();

        tracker
            .add_file_comment("a.md", "read later", None)
            .await
            .unwrap();

        let all = tracker.get_all_highlights().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_virtual);
        assert_eq!(tracker.search("later").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_store_changes() {
        let (corpus, store, tracker) = tracker();
        corpus.put("a.md", "==alpha==");
        tracker.build_index().await.unwrap();
        assert!(tracker.search("outside").await.unwrap().is_empty());

        let mut annotation = PersistedAnnotation::new_virtual("a.md");
        annotation
            .comments
            .push(crate::annotation::Comment::new("written outside", None));
        store.write("a.md", &[annotation]).await.unwrap();

        tracker.invalidate("a.md").await;
        assert_eq!(tracker.search("outside").await.unwrap().len(), 1);
    }
}
