//! Cached access to persisted annotations
//!
//! Reads are served from an in-memory cache filled from the store on miss.
//! Every mutation is written to the store first and then to the cache, so a
//! caller never sees a value that was not persisted.

use super::{Comment, PersistedAnnotation, PositionCorrection, ReferenceGuard};
use crate::error::{Error, Result};
use crate::extract::{annotation_id, virtual_annotation_id, RawHighlightSpan};
use crate::storage::AnnotationStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Repository façade over an [`AnnotationStore`]
pub struct AnnotationRepository {
    store: Arc<dyn AnnotationStore>,
    cache: RwLock<HashMap<String, Vec<PersistedAnnotation>>>,
}

impl AnnotationRepository {
    /// Create a repository backed by `store`
    pub fn new(store: Arc<dyn AnnotationStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Annotations for a file, loading through the store on a cache miss
    pub async fn get_file_highlights(&self, path: &str) -> Result<Vec<PersistedAnnotation>> {
        if let Some(cached) = self.cache.read().await.get(path) {
            return Ok(cached.clone());
        }

        let loaded = self.store.read(path).await?.unwrap_or_default();
        let mut cache = self.cache.write().await;
        let entry = cache.entry(path.to_string()).or_insert(loaded);
        Ok(entry.clone())
    }

    /// Replace the annotations for a file
    pub async fn save_file_highlights(
        &self,
        path: &str,
        annotations: Vec<PersistedAnnotation>,
    ) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.store.write(path, &annotations).await?;
        cache.insert(path.to_string(), annotations);
        Ok(())
    }

    /// Delete every annotation for a file
    pub async fn delete_file_highlights(&self, path: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.store.remove(path).await?;
        cache.remove(path);
        Ok(())
    }

    /// Move a file's annotations to `new_path`
    pub async fn handle_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut cache = self.cache.write().await;

        let mut annotations = match cache.get(old_path) {
            Some(cached) => cached.clone(),
            None => self.store.read(old_path).await?.unwrap_or_default(),
        };

        if annotations.is_empty() {
            cache.remove(old_path);
            cache.remove(new_path);
            return Ok(());
        }

        for annotation in &mut annotations {
            annotation.file_path = new_path.to_string();
        }

        self.store.write(new_path, &annotations).await?;
        self.store.remove(old_path).await?;

        cache.remove(old_path);
        cache.insert(new_path.to_string(), annotations);

        tracing::debug!("Moved annotations from {} to {}", old_path, new_path);
        Ok(())
    }

    /// Drop the cached entry for a file
    pub async fn invalidate(&self, path: &str) {
        self.cache.write().await.remove(path);
    }

    /// Load every file the store knows about into the cache
    pub async fn warm(&self) -> Result<usize> {
        let files = self.store.list_known_files().await?;
        for file in &files {
            self.get_file_highlights(file).await?;
        }
        Ok(files.len())
    }

    /// Find an annotation by id across all cached files
    pub async fn find_by_id(&self, id: &str) -> Option<PersistedAnnotation> {
        let cache = self.cache.read().await;
        cache
            .values()
            .flat_map(|list| list.iter())
            .find(|annotation| annotation.id == id)
            .cloned()
    }

    /// Find an annotation in a file by its block id
    pub async fn find_by_block_id(
        &self,
        path: &str,
        block_id: &str,
    ) -> Result<Option<PersistedAnnotation>> {
        let annotations = self.get_file_highlights(path).await?;
        Ok(annotations
            .into_iter()
            .find(|a| a.block_id.as_deref() == Some(block_id)))
    }

    /// Add a comment to the highlight `span`, creating its annotation if needed
    pub async fn add_comment(
        &self,
        span: &RawHighlightSpan,
        content: &str,
        author: Option<&str>,
    ) -> Result<PersistedAnnotation> {
        let id = span
            .id
            .clone()
            .unwrap_or_else(|| annotation_id(&span.file_path, span.start_offset, &span.text));

        self.mutate(&span.file_path, |annotations| {
            let index = match annotations.iter().position(|a| a.id == id) {
                Some(index) => index,
                None => {
                    let mut created = PersistedAnnotation::from_span(span);
                    created.id = id.clone();
                    annotations.push(created);
                    annotations.len() - 1
                }
            };

            let annotation = &mut annotations[index];
            annotation.comments.push(Comment::new(content, author));
            annotation.position = span.start_offset;
            annotation.touch();
            Ok(annotation.clone())
        })
        .await
    }

    /// Add a file-level comment
    pub async fn add_file_comment(
        &self,
        path: &str,
        content: &str,
        author: Option<&str>,
    ) -> Result<PersistedAnnotation> {
        let id = virtual_annotation_id(path);

        self.mutate(path, |annotations| {
            let index = match annotations.iter().position(|a| a.id == id) {
                Some(index) => index,
                None => {
                    annotations.push(PersistedAnnotation::new_virtual(path));
                    annotations.len() - 1
                }
            };

            let annotation = &mut annotations[index];
            annotation.comments.push(Comment::new(content, author));
            annotation.touch();
            Ok(annotation.clone())
        })
        .await
    }

    /// Replace the content of a comment
    pub async fn update_comment(
        &self,
        path: &str,
        annotation_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<PersistedAnnotation> {
        self.mutate(path, |annotations| {
            let annotation = find_mut(annotations, path, annotation_id)?;
            let comment = annotation
                .comments
                .iter_mut()
                .find(|c| c.id == comment_id)
                .ok_or_else(|| Error::CommentNotFound {
                    annotation: annotation_id.to_string(),
                    id: comment_id.to_string(),
                })?;

            comment.content = content.to_string();
            comment.updated_at = Utc::now();
            annotation.touch();
            Ok(annotation.clone())
        })
        .await
    }

    /// Delete a comment.
    ///
    /// Returns the annotation if it still exists afterwards. An annotation
    /// left without comments is removed unless `guard` references it.
    pub async fn delete_comment(
        &self,
        path: &str,
        annotation_id: &str,
        comment_id: &str,
        guard: &dyn ReferenceGuard,
    ) -> Result<Option<PersistedAnnotation>> {
        self.mutate(path, |annotations| {
            let annotation = find_mut(annotations, path, annotation_id)?;
            let before = annotation.comments.len();
            annotation.comments.retain(|c| c.id != comment_id);
            if annotation.comments.len() == before {
                return Err(Error::CommentNotFound {
                    annotation: annotation_id.to_string(),
                    id: comment_id.to_string(),
                });
            }
            annotation.touch();

            if annotation.comments.is_empty() && !guard.is_referenced(annotation_id) {
                annotations.retain(|a| a.id != annotation_id);
                return Ok(None);
            }

            Ok(annotations.iter().find(|a| a.id == annotation_id).cloned())
        })
        .await
    }

    /// Remove orphaned annotations among `ids`. Returns how many were removed.
    pub async fn prune(
        &self,
        path: &str,
        ids: &[String],
        guard: &dyn ReferenceGuard,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.mutate(path, |annotations| {
            let before = annotations.len();
            annotations.retain(|a| {
                !(ids.contains(&a.id) && a.is_orphaned() && !guard.is_referenced(&a.id))
            });
            Ok(before - annotations.len())
        })
        .await
    }

    /// Apply drift corrections for a file in one write
    pub async fn apply_position_corrections(
        &self,
        path: &str,
        corrections: &[PositionCorrection],
    ) -> Result<usize> {
        self.mutate(path, |annotations| {
            let mut applied = 0;
            for correction in corrections {
                if let Some(annotation) = annotations.iter_mut().find(|a| a.id == correction.id) {
                    if annotation.position != correction.position {
                        annotation.position = correction.position;
                        applied += 1;
                    }
                }
            }
            Ok(applied)
        })
        .await
    }

    /// Load, modify and persist a file's annotations under the cache lock.
    ///
    /// Nothing is written if `f` fails or leaves the list unchanged.
    async fn mutate<T, F>(&self, path: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<PersistedAnnotation>) -> Result<T>,
    {
        let mut cache = self.cache.write().await;

        let current = match cache.get(path) {
            Some(cached) => cached.clone(),
            None => self.store.read(path).await?.unwrap_or_default(),
        };

        let mut updated = current.clone();
        let result = f(&mut updated)?;

        if updated != current {
            if updated.is_empty() {
                self.store.remove(path).await?;
            } else {
                self.store.write(path, &updated).await?;
            }
        }

        cache.insert(path.to_string(), updated);
        Ok(result)
    }
}

fn find_mut<'a>(
    annotations: &'a mut [PersistedAnnotation],
    path: &str,
    annotation_id: &str,
) -> Result<&'a mut PersistedAnnotation> {
    annotations
        .iter_mut()
        .find(|a| a.id == annotation_id)
        .ok_or_else(|| Error::AnnotationNotFound {
            file: path.to_string(),
            id: annotation_id.to_string(),
        })
}
