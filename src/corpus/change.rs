//! File-change events for tracked documents

/// A change to one document, as reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// Document was created
    Created(String),
    /// Document content changed
    Modified(String),
    /// Document was deleted
    Deleted(String),
    /// Document moved from `from` to `to`
    Renamed { from: String, to: String },
}

impl FileEvent {
    /// Path the document lives at after the event
    pub fn path(&self) -> &str {
        match self {
            FileEvent::Created(path) | FileEvent::Modified(path) | FileEvent::Deleted(path) => {
                path
            }
            FileEvent::Renamed { to, .. } => to,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FileEvent::Created(_) => "created",
            FileEvent::Modified(_) => "modified",
            FileEvent::Deleted(_) => "deleted",
            FileEvent::Renamed { .. } => "renamed",
        }
    }
}

impl std::fmt::Display for FileEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileEvent::Renamed { from, to } => write!(f, "renamed {} -> {}", from, to),
            other => write!(f, "{} {}", other.kind(), other.path()),
        }
    }
}
