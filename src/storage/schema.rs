//! Database schema definition

/// SQL schema for the annotation database
pub const SCHEMA: &str = r#"
-- Files that have an annotation list (possibly empty)
CREATE TABLE IF NOT EXISTS annotation_files (
    file_path TEXT PRIMARY KEY,
    updated_at TEXT NOT NULL
);

-- Annotations, ordered within a file by ordinal
CREATE TABLE IF NOT EXISTS annotations (
    id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    text TEXT NOT NULL,
    position INTEGER NOT NULL,
    block_id TEXT,
    is_virtual INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (file_path, id)
);

CREATE INDEX IF NOT EXISTS idx_annotations_id ON annotations(id);

-- Comments, ordered within an annotation by ordinal
CREATE TABLE IF NOT EXISTS comments (
    id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    annotation_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    content TEXT NOT NULL,
    author TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (file_path, annotation_id, id)
);

CREATE INDEX IF NOT EXISTS idx_comments_annotation ON comments(file_path, annotation_id);
"#;
