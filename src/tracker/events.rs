//! Single-worker queue for file-change events
//!
//! Events are applied one at a time in arrival order, so the updates for a
//! given file are never reordered.

use crate::corpus::FileEvent;
use crate::error::Result;
use crate::index::HighlightIndex;
use crate::pipeline::Pipeline;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running event worker
pub struct EventQueue {
    sender: mpsc::UnboundedSender<FileEvent>,
    worker: JoinHandle<()>,
}

impl EventQueue {
    /// Start a worker applying events to `index`
    pub fn spawn(index: Arc<HighlightIndex>, pipeline: Arc<Pipeline>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<FileEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                tracing::debug!("Applying {}", event);
                if let Err(e) = apply_event(&index, &pipeline, &event).await {
                    tracing::warn!("Failed to apply {}: {}", event, e);
                }
            }
            tracing::debug!("Event queue closed");
        });

        Self { sender, worker }
    }

    /// Queue an event. Returns `false` if the worker has stopped.
    pub fn send(&self, event: FileEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Close the queue and wait for queued events to drain
    pub async fn close(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            tracing::warn!("Event worker ended abnormally: {}", e);
        }
    }
}

/// Apply one event to the content cache, the repository and the index
pub async fn apply_event(
    index: &HighlightIndex,
    pipeline: &Pipeline,
    event: &FileEvent,
) -> Result<()> {
    match event {
        FileEvent::Created(path) | FileEvent::Modified(path) => {
            pipeline.invalidate(path);
            index.update_file(path).await
        }
        FileEvent::Deleted(path) => {
            pipeline.invalidate(path);
            pipeline.repo().invalidate(path).await;
            index.remove_file(path).await;
            Ok(())
        }
        FileEvent::Renamed { from, to } => {
            pipeline.invalidate(from);
            pipeline.invalidate(to);
            pipeline.repo().handle_rename(from, to).await?;
            index.remove_file(from).await;
            index.update_file(to).await
        }
    }
}
