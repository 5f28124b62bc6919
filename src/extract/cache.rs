//! Document content cache
//!
//! Entries are keyed by path and validated against the modification time,
//! so a hit means the file was not re-read.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

struct CachedContent {
    modified: DateTime<Utc>,
    content: Arc<str>,
}

/// LRU cache of document contents
pub struct ContentCache {
    entries: Mutex<LruCache<String, CachedContent>>,
}

impl ContentCache {
    /// Create a cache holding at most `capacity` documents
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Content for `path` if cached at exactly `modified`
    pub fn get(&self, path: &str, modified: DateTime<Utc>) -> Option<Arc<str>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(path) {
            Some(entry) if entry.modified == modified => Some(Arc::clone(&entry.content)),
            _ => None,
        }
    }

    /// Store content read at `modified`
    pub fn insert(&self, path: &str, modified: DateTime<Utc>, content: Arc<str>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(path.to_string(), CachedContent { modified, content });
        }
    }

    /// Drop the entry for `path`
    pub fn invalidate(&self, path: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(path);
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hit_requires_same_mtime() {
        let cache = ContentCache::new(4);
        let t0 = Utc::now();
        cache.insert("a.md", t0, Arc::from("hello"));

        assert_eq!(cache.get("a.md", t0).as_deref(), Some("hello"));
        assert!(cache.get("a.md", t0 + Duration::seconds(1)).is_none());
        assert!(cache.get("b.md", t0).is_none());
    }

    #[test]
    fn test_invalidate_and_capacity() {
        let cache = ContentCache::new(2);
        let t0 = Utc::now();
        cache.insert("a.md", t0, Arc::from("a"));
        cache.insert("b.md", t0, Arc::from("b"));
        cache.insert("c.md", t0, Arc::from("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a.md", t0).is_none());

        cache.invalidate("b.md");
        assert!(cache.get("b.md", t0).is_none());
        assert_eq!(cache.len(), 1);
    }
}
