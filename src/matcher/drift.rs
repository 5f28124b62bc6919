//! Deferred write-back of drifted annotation positions

use crate::annotation::{AnnotationRepository, PositionCorrection};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Persists position corrections shortly after a merge.
///
/// The write happens off the read path; `updated_at` is left alone.
/// Short-lived callers must [`flush`](Self::flush) before exiting or the
/// pending writes are lost with the runtime.
pub struct DriftCorrector {
    repo: Arc<AnnotationRepository>,
    delay: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl DriftCorrector {
    pub fn new(repo: Arc<AnnotationRepository>, delay: Duration) -> Self {
        Self {
            repo,
            delay,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Schedule corrections for one file. Returns `false` when there is nothing to do.
    pub fn schedule(&self, path: &str, corrections: Vec<PositionCorrection>) -> bool {
        if corrections.is_empty() {
            return false;
        }

        let repo = self.repo.clone();
        let delay = self.delay;
        let path = path.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match repo.apply_position_corrections(&path, &corrections).await {
                Ok(applied) if applied > 0 => {
                    tracing::debug!("Corrected {} drifted positions in {}", applied, path);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Drift correction for {} failed: {}", path, e);
                }
            }
        });

        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
        true
    }

    /// Number of writes scheduled and not yet finished
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .map(|p| p.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for every scheduled write to finish
    pub async fn flush(&self) {
        let handles = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::debug!("Drift correction task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::PersistedAnnotation;
    use crate::extract::RawHighlightSpan;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_flush_waits_for_scheduled_writes() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(AnnotationRepository::new(store.clone()));
        let annotation = PersistedAnnotation::from_span(&RawHighlightSpan {
            id: None,
            text: "alpha".to_string(),
            start_offset: 100,
            span_length: 9,
            background_color: None,
            is_cloze_marked: false,
            block_id: None,
            file_path: "a.md".to_string(),
        });
        let updated_at = annotation.updated_at;
        repo.save_file_highlights("a.md", vec![annotation.clone()])
            .await
            .unwrap();

        let corrector = DriftCorrector::new(repo.clone(), Duration::from_millis(50));
        assert!(!corrector.schedule("a.md", Vec::new()));
        assert_eq!(corrector.pending(), 0);

        assert!(corrector.schedule(
            "a.md",
            vec![PositionCorrection {
                id: annotation.id.clone(),
                position: 140,
            }],
        ));
        assert_eq!(corrector.pending(), 1);
        assert_eq!(repo.get_file_highlights("a.md").await.unwrap()[0].position, 100);

        corrector.flush().await;
        assert_eq!(corrector.pending(), 0);

        let stored = repo.get_file_highlights("a.md").await.unwrap();
        assert_eq!(stored[0].position, 140);
        assert_eq!(stored[0].updated_at, updated_at);
    }
}
