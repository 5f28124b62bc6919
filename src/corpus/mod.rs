//! Document corpus access
//!
//! This module covers the host document store:
//! - Listing tracked documents (one extension, minus ignore patterns)
//! - Reading content and modification times
//! - File-change events fed to the tracker

mod change;
mod watch;

pub use change::FileEvent;
pub use watch::{translate, FsWatcher};

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Identity and modification time of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Path relative to the corpus root, `/`-separated
    pub path: String,
    pub modified: DateTime<Utc>,
}

/// Source of documents
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Every tracked document, ordered by path
    async fn list_documents(&self) -> Result<Vec<DocumentMeta>>;

    /// Modification time, or `None` if the document does not exist
    async fn stat(&self, path: &str) -> Result<Option<DocumentMeta>>;

    /// Full content of a document
    async fn read(&self, path: &str) -> Result<String>;

    /// Whether `path` is a document this corpus tracks
    fn tracks(&self, path: &str) -> bool;
}

/// Corpus backed by a directory tree
#[derive(Debug, Clone)]
pub struct FsCorpus {
    root: PathBuf,
    extension: String,
    ignored: GlobSet,
}

impl FsCorpus {
    /// Patterns that fail to compile are logged and skipped.
    pub fn new<P: AsRef<Path>>(root: P, extension: &str, ignore_patterns: Vec<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
            ignored: compile_ignores(&ignore_patterns),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative corpus path for an absolute filesystem path
    pub fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored.is_match(path)
    }

    fn modified(metadata: &std::fs::Metadata) -> Result<DateTime<Utc>> {
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }
}

#[async_trait]
impl Corpus for FsCorpus {
    async fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        let mut documents = Vec::new();

        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(path) = self.relative(entry.path()) else {
                continue;
            };
            if !self.tracks(&path) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => documents.push(DocumentMeta {
                    path,
                    modified: Self::modified(&metadata)?,
                }),
                Err(e) => tracing::warn!("Skipping {}: {}", path, e),
            }
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    async fn stat(&self, path: &str) -> Result<Option<DocumentMeta>> {
        match tokio::fs::metadata(self.root.join(path)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(DocumentMeta {
                path: path.to_string(),
                modified: Self::modified(&metadata)?,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.root.join(path)).await?)
    }

    fn tracks(&self, path: &str) -> bool {
        let matches_extension = Path::new(path)
            .extension()
            .map(|e| e.eq_ignore_ascii_case(self.extension.as_str()))
            .unwrap_or(false);
        matches_extension && !self.is_ignored(path)
    }
}

fn compile_ignores(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("Skipping ignore pattern {:?}: {}", pattern, e),
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Failed to compile ignore patterns: {}", e);
        GlobSet::empty()
    })
}

/// Corpus held in memory, for tests and embedding
pub struct MemoryCorpus {
    documents: RwLock<BTreeMap<String, (String, DateTime<Utc>)>>,
    reads: AtomicUsize,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of content reads served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Insert or replace a document, stamping it with the current time
    pub fn put(&self, path: &str, content: &str) {
        if let Ok(mut documents) = self.documents.write() {
            documents.insert(path.to_string(), (content.to_string(), Utc::now()));
        }
    }

    pub fn remove(&self, path: &str) {
        if let Ok(mut documents) = self.documents.write() {
            documents.remove(path);
        }
    }

    fn poisoned() -> Error {
        Error::Storage("memory corpus lock poisoned".to_string())
    }
}

impl Default for MemoryCorpus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Corpus for MemoryCorpus {
    async fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        let documents = self.documents.read().map_err(|_| Self::poisoned())?;
        Ok(documents
            .iter()
            .map(|(path, (_, modified))| DocumentMeta {
                path: path.clone(),
                modified: *modified,
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<DocumentMeta>> {
        let documents = self.documents.read().map_err(|_| Self::poisoned())?;
        Ok(documents.get(path).map(|(_, modified)| DocumentMeta {
            path: path.to_string(),
            modified: *modified,
        }))
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let documents = self.documents.read().map_err(|_| Self::poisoned())?;
        documents
            .get(path)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no document at {}", path),
                ))
            })
    }

    fn tracks(&self, _path: &str) -> bool {
        true
    }
}
