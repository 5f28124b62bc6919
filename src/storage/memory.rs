//! In-memory [`AnnotationStore`] for tests and embedding.

use super::AnnotationStore;
use crate::annotation::PersistedAnnotation;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Annotation store that lives in process memory.
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Vec<PersistedAnnotation>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `write` calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn poisoned() -> Error {
        Error::Storage("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnotationStore for MemoryStore {
    async fn read(&self, file_path: &str) -> Result<Option<Vec<PersistedAnnotation>>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files.get(file_path).cloned())
    }

    async fn write(&self, file_path: &str, annotations: &[PersistedAnnotation]) -> Result<()> {
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.insert(file_path.to_string(), annotations.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, file_path: &str) -> Result<()> {
        let mut files = self.files.write().map_err(|_| Self::poisoned())?;
        files.remove(file_path);
        Ok(())
    }

    async fn list_known_files(&self) -> Result<Vec<String>> {
        let files = self.files.read().map_err(|_| Self::poisoned())?;
        Ok(files.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.read("a.md").await.unwrap().is_none());

        let list = vec![PersistedAnnotation::new_virtual("a.md")];
        store.write("a.md", &list).await.unwrap();
        assert_eq!(store.read("a.md").await.unwrap(), Some(list));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.list_known_files().await.unwrap(), vec!["a.md"]);

        store.remove("a.md").await.unwrap();
        assert!(store.read("a.md").await.unwrap().is_none());
    }
}
