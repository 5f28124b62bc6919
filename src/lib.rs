//! Marginalia - durable highlights and annotations for Markdown corpora
//!
//! Highlights are extracted from document text with configurable rules,
//! reconciled against stored annotations after every edit, and indexed
//! for keyword search over highlight text and comments.

pub mod annotation;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod extract;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod storage;
pub mod tracker;

/// Re-export commonly used types
pub use annotation::{AnnotationRepository, Comment, PersistedAnnotation};
pub use config::Config;
pub use corpus::{Corpus, FileEvent, FsCorpus};
pub use error::{Error, Result};
pub use extract::{HighlightExtractor, RawHighlightSpan};
pub use index::{IndexState, IndexStats};
pub use matcher::{MergedHighlight, Reconciler};
pub use storage::{AnnotationStore, Database};
pub use tracker::HighlightTracker;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "marginalia";
