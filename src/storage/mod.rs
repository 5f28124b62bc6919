//! Annotation persistence
//!
//! The engine talks to persistence through [`AnnotationStore`]. Two
//! backends ship with the crate:
//! - [`Database`]: SQLite, used by the CLI
//! - [`MemoryStore`]: in-process, for tests and embedding

mod memory;
mod schema;

pub use memory::MemoryStore;
pub use schema::SCHEMA;

use crate::annotation::{Comment, PersistedAnnotation};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Persistence backend for per-file annotation lists.
///
/// `write` followed by `read` must return an equal list.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Annotations for a file, or `None` if nothing was ever written
    async fn read(&self, file_path: &str) -> Result<Option<Vec<PersistedAnnotation>>>;

    /// Replace the annotations for a file
    async fn write(&self, file_path: &str, annotations: &[PersistedAnnotation]) -> Result<()>;

    /// Forget a file entirely
    async fn remove(&self, file_path: &str) -> Result<()>;

    /// Every file with a stored list
    async fn list_known_files(&self) -> Result<Vec<String>>;
}

/// Database statistics
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub files: usize,
    pub annotations: usize,
    pub comments: usize,
}

/// SQLite-backed annotation store
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.lock()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database connection lock poisoned".to_string()))
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            files: count("SELECT COUNT(*) FROM annotation_files")?,
            annotations: count("SELECT COUNT(*) FROM annotations")?,
            comments: count("SELECT COUNT(*) FROM comments")?,
        })
    }

    fn read_file(&self, file_path: &str) -> Result<Option<Vec<PersistedAnnotation>>> {
        let conn = self.lock()?;

        let known: Option<String> = conn
            .query_row(
                "SELECT file_path FROM annotation_files WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Ok(None);
        }

        let mut comments: HashMap<String, Vec<Comment>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                r#"
                SELECT annotation_id, id, content, author, created_at, updated_at
                FROM comments WHERE file_path = ?1
                ORDER BY annotation_id, ordinal
                "#,
            )?;

            let rows = stmt.query_map(params![file_path], |row| {
                Ok(CommentRow {
                    annotation_id: row.get(0)?,
                    id: row.get(1)?,
                    content: row.get(2)?,
                    author: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?;

            for row in rows {
                let row = row?;
                let annotation_id = row.annotation_id.clone();
                comments
                    .entry(annotation_id)
                    .or_default()
                    .push(row.into_comment()?);
            }
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT id, file_path, text, position, block_id, is_virtual, created_at, updated_at
            FROM annotations WHERE file_path = ?1
            ORDER BY ordinal
            "#,
        )?;

        let rows = stmt.query_map(params![file_path], |row| {
            Ok(AnnotationRow {
                id: row.get(0)?,
                file_path: row.get(1)?,
                text: row.get(2)?,
                position: row.get(3)?,
                block_id: row.get(4)?,
                is_virtual: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?;

        let mut annotations = Vec::new();
        for row in rows {
            let row = row?;
            let attached = comments.remove(&row.id).unwrap_or_default();
            annotations.push(row.into_annotation(attached)?);
        }

        Ok(Some(annotations))
    }

    fn write_file(&self, file_path: &str, annotations: &[PersistedAnnotation]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM comments WHERE file_path = ?1", params![file_path])?;
        tx.execute(
            "DELETE FROM annotations WHERE file_path = ?1",
            params![file_path],
        )?;

        for (ordinal, annotation) in annotations.iter().enumerate() {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO annotations (
                    id, file_path, ordinal, text, position, block_id,
                    is_virtual, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    annotation.id,
                    file_path,
                    ordinal as i64,
                    annotation.text,
                    annotation.position as i64,
                    annotation.block_id,
                    annotation.is_virtual,
                    encode_time(&annotation.created_at),
                    encode_time(&annotation.updated_at),
                ],
            )?;

            for (comment_ordinal, comment) in annotation.comments.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO comments (
                        id, file_path, annotation_id, ordinal, content, author,
                        created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        comment.id,
                        file_path,
                        annotation.id,
                        comment_ordinal as i64,
                        comment.content,
                        comment.author,
                        encode_time(&comment.created_at),
                        encode_time(&comment.updated_at),
                    ],
                )?;
            }
        }

        tx.execute(
            r#"
            INSERT INTO annotation_files (file_path, updated_at) VALUES (?1, ?2)
            ON CONFLICT(file_path) DO UPDATE SET updated_at = excluded.updated_at
            "#,
            params![file_path, encode_time(&Utc::now())],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn remove_file(&self, file_path: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM comments WHERE file_path = ?1", params![file_path])?;
        tx.execute(
            "DELETE FROM annotations WHERE file_path = ?1",
            params![file_path],
        )?;
        tx.execute(
            "DELETE FROM annotation_files WHERE file_path = ?1",
            params![file_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn known_files(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT file_path FROM annotation_files ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }
}

#[async_trait]
impl AnnotationStore for Database {
    async fn read(&self, file_path: &str) -> Result<Option<Vec<PersistedAnnotation>>> {
        self.read_file(file_path)
    }

    async fn write(&self, file_path: &str, annotations: &[PersistedAnnotation]) -> Result<()> {
        self.write_file(file_path, annotations)
    }

    async fn remove(&self, file_path: &str) -> Result<()> {
        self.remove_file(file_path)
    }

    async fn list_known_files(&self) -> Result<Vec<String>> {
        self.known_files()
    }
}

fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("invalid timestamp '{}': {}", value, e)))
}

struct AnnotationRow {
    id: String,
    file_path: String,
    text: String,
    position: i64,
    block_id: Option<String>,
    is_virtual: bool,
    created_at: String,
    updated_at: String,
}

impl AnnotationRow {
    fn into_annotation(self, comments: Vec<Comment>) -> Result<PersistedAnnotation> {
        Ok(PersistedAnnotation {
            id: self.id,
            text: self.text,
            position: self.position.max(0) as usize,
            block_id: self.block_id,
            comments,
            created_at: decode_time(&self.created_at)?,
            updated_at: decode_time(&self.updated_at)?,
            is_virtual: self.is_virtual,
            file_path: self.file_path,
        })
    }
}

struct CommentRow {
    annotation_id: String,
    id: String,
    content: String,
    author: Option<String>,
    created_at: String,
    updated_at: String,
}

impl CommentRow {
    fn into_comment(self) -> Result<Comment> {
        Ok(Comment {
            id: self.id,
            content: self.content,
            created_at: decode_time(&self.created_at)?,
            updated_at: decode_time(&self.updated_at)?,
            author: self.author,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(id: &str, text: &str, position: usize, comments: &[&str]) -> PersistedAnnotation {
        let now = Utc::now();
        PersistedAnnotation {
            id: id.to_string(),
            text: text.to_string(),
            position,
            block_id: None,
            comments: comments.iter().map(|c| Comment::new(c, Some("me"))).collect(),
            created_at: now,
            updated_at: now,
            is_virtual: false,
            file_path: "notes/a.md".to_string(),
        }
    }

    #[tokio::test]
    async fn test_database_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.read("notes/a.md").await.unwrap().is_none());

        let mut virtual_note = PersistedAnnotation::new_virtual("notes/a.md");
        virtual_note.comments.push(Comment::new("file note", None));

        let list = vec![
            annotation("b", "beta", 30, &["second", "third"]),
            annotation("a", "alpha", 4, &["first"]),
            virtual_note,
        ];
        db.write("notes/a.md", &list).await.unwrap();

        let loaded = db.read("notes/a.md").await.unwrap().unwrap();
        assert_eq!(loaded, list);
    }

    #[tokio::test]
    async fn test_database_empty_list_is_known() {
        let db = Database::open_in_memory().unwrap();
        db.write("empty.md", &[]).await.unwrap();

        assert_eq!(db.read("empty.md").await.unwrap(), Some(Vec::new()));
        assert_eq!(db.list_known_files().await.unwrap(), vec!["empty.md"]);
    }

    #[tokio::test]
    async fn test_database_overwrite_and_remove() {
        let db = Database::open_in_memory().unwrap();
        db.write("a.md", &[annotation("a", "alpha", 4, &["x"])])
            .await
            .unwrap();
        db.write("a.md", &[annotation("b", "beta", 9, &[])])
            .await
            .unwrap();

        let loaded = db.read("a.md").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "b");

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.annotations, 1);
        assert_eq!(stats.comments, 0);

        db.remove("a.md").await.unwrap();
        assert!(db.read("a.md").await.unwrap().is_none());
        assert!(db.list_known_files().await.unwrap().is_empty());
    }
}
