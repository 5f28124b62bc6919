//! Command implementations

use super::{CommentCommand, ConfigArgs, OutputFormat};
use crate::annotation::{NoReferences, PersistedAnnotation};
use crate::config::{Config, DATA_DIR};
use crate::corpus::{FsCorpus, FsWatcher};
use crate::index::IndexStats;
use crate::matcher::MergedHighlight;
use crate::storage::Database;
use crate::tracker::HighlightTracker;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the annotation database inside the data directory
pub const DATABASE_FILE: &str = "annotations.db";

/// An initialized corpus opened for commands
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub corpus: Arc<FsCorpus>,
    pub database: Arc<Database>,
    pub tracker: HighlightTracker,
}

impl Workspace {
    /// Open the corpus at `path`, which must have been initialized
    pub fn open(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {:?}", path))?;
        let data_dir = root.join(DATA_DIR);

        if !data_dir.exists() {
            anyhow::bail!("Marginalia not initialized. Run 'marginalia init' first.");
        }

        let config = Config::load_or_default(&root)?;
        let database = Arc::new(
            Database::open(data_dir.join(DATABASE_FILE))
                .with_context(|| format!("Failed to open database in {:?}", data_dir))?,
        );
        let corpus = Arc::new(FsCorpus::new(
            &root,
            &config.extension,
            config.ignore_patterns.clone(),
        ));
        let tracker = HighlightTracker::new(
            corpus.clone(),
            database.clone(),
            Arc::new(NoReferences),
            &config,
        );

        Ok(Self {
            root,
            config,
            corpus,
            database,
            tracker,
        })
    }
}

/// Normalize a document argument to a corpus-relative path
pub fn document_path(file: &str) -> String {
    file.trim_start_matches("./").replace('\\', "/")
}

/// Initialize marginalia in a directory
pub fn init(path: &Path, force: bool) -> Result<()> {
    let data_dir = path.join(DATA_DIR);
    if data_dir.exists() && !force {
        anyhow::bail!("Marginalia already initialized. Use --force to re-initialize.");
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {:?}", data_dir))?;

    let db_path = data_dir.join(DATABASE_FILE);
    let _db = Database::open(&db_path)
        .with_context(|| format!("Failed to create database {:?}", db_path))?;

    Config::default().save(path)?;

    println!("✓ Initialized marginalia in {:?}", path);
    println!("  Database: {:?}", db_path);
    println!("  Config: {:?}", Config::path(path));

    Ok(())
}

/// Build the index and report statistics
pub async fn index(path: &Path, format: OutputFormat) -> Result<IndexStats> {
    let workspace = Workspace::open(path)?;
    let stats = workspace.tracker.build_index().await?;
    workspace.tracker.flush().await;
    let db_stats = workspace.database.get_stats()?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Highlight Index");
            println!("===============\n");
            println!("State: {}", stats.state);
            println!("Documents with highlights: {}", stats.files);
            println!("Highlights: {}", stats.highlights);
            println!("Indexed words: {}", stats.words);
            println!(
                "Stored annotations: {} ({} comments in {} files)",
                db_stats.annotations, db_stats.comments, db_stats.files
            );
        }
    }

    Ok(stats)
}

/// List highlights, for one document or the whole corpus
pub async fn list(
    path: &Path,
    file: Option<&str>,
    commented: bool,
    format: OutputFormat,
) -> Result<Vec<MergedHighlight>> {
    let workspace = Workspace::open(path)?;

    let mut highlights = match file {
        Some(file) => {
            workspace
                .tracker
                .get_file_highlights(&document_path(file))
                .await?
        }
        None => workspace.tracker.get_all_highlights_or_scan().await?,
    };
    workspace.tracker.flush().await;
    if commented {
        highlights.retain(|h| !h.comments.is_empty());
    }

    print_highlights(&highlights, format)?;
    Ok(highlights)
}

/// Search highlight text and comments
pub async fn search(path: &Path, term: &str, format: OutputFormat) -> Result<Vec<MergedHighlight>> {
    let workspace = Workspace::open(path)?;
    workspace.tracker.build_index().await?;

    let found = workspace.tracker.search(term).await?;
    workspace.tracker.flush().await;
    print_highlights(&found, format)?;
    Ok(found)
}

/// Run a comment subcommand
pub async fn comment(path: &Path, command: &CommentCommand, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let tracker = &workspace.tracker;

    match command {
        CommentCommand::Add(args) => {
            let file = document_path(&args.file);
            let highlights = tracker.get_file_highlights(&file).await?;

            let target = match (&args.id, &args.text) {
                (Some(id), _) => highlights.iter().find(|h| &h.id == id),
                (None, Some(text)) => highlights
                    .iter()
                    .filter(|h| !h.is_virtual && &h.text == text)
                    .nth(args.occurrence.saturating_sub(1)),
                (None, None) => None,
            }
            .ok_or_else(|| anyhow::anyhow!("No matching highlight in {}", file))?;

            let annotation = tracker
                .add_comment(&target.as_span(), &args.content, args.author.as_deref())
                .await?;
            print_annotation("Added comment to", &annotation, format)?;
        }

        CommentCommand::File(args) => {
            let annotation = tracker
                .add_file_comment(&document_path(&args.file), &args.content, args.author.as_deref())
                .await?;
            print_annotation("Added file comment to", &annotation, format)?;
        }

        CommentCommand::Edit(args) => {
            let annotation = tracker
                .update_comment(
                    &document_path(&args.file),
                    &args.annotation_id,
                    &args.comment_id,
                    &args.content,
                )
                .await?;
            print_annotation("Updated comment on", &annotation, format)?;
        }

        CommentCommand::Delete(args) => {
            let remaining = tracker
                .delete_comment(&document_path(&args.file), &args.annotation_id, &args.comment_id)
                .await?;
            match (remaining, format) {
                (Some(annotation), _) => {
                    print_annotation("Deleted comment from", &annotation, format)?
                }
                (None, OutputFormat::Json) => println!("null"),
                (None, OutputFormat::Text) => {
                    println!("✓ Deleted comment and its annotation {}", args.annotation_id)
                }
            }
        }
    }

    tracker.flush().await;
    Ok(())
}

/// Watch the corpus until interrupted
pub async fn watch(path: &Path, poll_ms: u64, now: bool) -> Result<()> {
    let workspace = Workspace::open(path)?;
    let tracker = if now {
        workspace.tracker.with_startup_delay(Duration::ZERO)
    } else {
        workspace.tracker
    };

    let mut watcher = FsWatcher::start(&workspace.corpus, Duration::from_millis(poll_ms))?;
    tracker.initialize().await;

    println!("Watching for changes in {:?}...", workspace.root);
    println!("Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            event = watcher.next() => {
                let Some(event) = event else {
                    break;
                };
                println!("📝 {}", event);
                if let Err(e) = tracker.notify(event).await {
                    eprintln!("Watch error: {}", e);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    tracker.destroy().await;
    let stats = tracker.index_stats().await;
    println!(
        "✓ {} highlights in {} documents (index {})",
        stats.highlights, stats.files, stats.state
    );

    Ok(())
}

/// Handle config command
pub fn config(path: &Path, args: &ConfigArgs) -> Result<()> {
    if !path.join(DATA_DIR).exists() {
        anyhow::bail!("Marginalia not initialized. Run 'marginalia init' first.");
    }
    let config = Config::load_or_default(path)?;

    if args.show || (!args.reset && args.get.is_none()) {
        println!("Marginalia Configuration");
        println!("========================\n");

        println!("Document extension: .{}", config.extension);

        println!("\nIgnore patterns:");
        for pattern in &config.ignore_patterns {
            println!("  - {}", pattern);
        }

        println!("\nHighlight rules:");
        println!("  - {} (built-in)", crate::extract::DEFAULT_RULE_NAME);
        for rule in &config.rules {
            let state = if rule.enabled { "" } else { ", disabled" };
            println!("  - {}: {}{}", rule.name, rule.pattern, state);
        }

        println!("\nMatching:");
        println!("  text+position tolerance: {}", config.matching.text_position_tolerance);
        println!("  position tolerance: {}", config.matching.fuzzy_position_tolerance);
        println!("  bucket size: {}", config.matching.bucket_size);
        println!("  dedup tolerance: {}", config.matching.dedup_tolerance);

        println!("\nIndex:");
        println!("  ttl: {}s", config.index.ttl_secs);
        println!("  startup delay: {:?}", config.index.startup_delay());
    }

    if let Some(ref key) = args.get {
        match key.as_str() {
            "extension" => println!("{}", config.extension),
            "text_position_tolerance" => println!("{}", config.matching.text_position_tolerance),
            "fuzzy_position_tolerance" => println!("{}", config.matching.fuzzy_position_tolerance),
            "bucket_size" => println!("{}", config.matching.bucket_size),
            "dedup_tolerance" => println!("{}", config.matching.dedup_tolerance),
            "ttl_secs" => println!("{}", config.index.ttl_secs),
            "drift_correction_delay_ms" => println!("{}", config.drift_correction_delay_ms),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    if args.reset {
        Config::default().save(path)?;
        println!("✓ Configuration reset to defaults");
    }

    Ok(())
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

fn print_annotation(
    action: &str,
    annotation: &PersistedAnnotation,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(annotation)?,
        OutputFormat::Text => {
            let target = if annotation.is_virtual {
                annotation.file_path.clone()
            } else {
                format!("\"{}\" in {}", annotation.text, annotation.file_path)
            };
            println!("✓ {} {}", action, target);
            println!("  Annotation: {}", annotation.id);
            if let Some(comment) = annotation.comments.last() {
                println!("  Comment: {}", comment.id);
            }
        }
    }
    Ok(())
}

/// Print highlights in the requested format
pub fn print_highlights(highlights: &[MergedHighlight], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(highlights),
        OutputFormat::Text => {
            print_highlights_text(highlights);
            Ok(())
        }
    }
}

/// Print highlights grouped by document
pub fn print_highlights_text(highlights: &[MergedHighlight]) {
    if highlights.is_empty() {
        println!("No highlights found.");
        return;
    }

    let mut current: Option<&str> = None;
    for highlight in highlights {
        if current != Some(highlight.file_path.as_str()) {
            if current.is_some() {
                println!();
            }
            println!("{}", highlight.file_path);
            current = Some(highlight.file_path.as_str());
        }

        if highlight.is_virtual {
            println!("  [file] {}", highlight.id);
        } else {
            let marker = if highlight.is_cloze_marked { " {{}}" } else { "" };
            println!(
                "  [{}] {}{}  ({})",
                highlight.start_offset, highlight.text, marker, highlight.id
            );
        }

        for comment in &highlight.comments {
            match &comment.author {
                Some(author) => println!("     💬 {} ({}, {})", comment.content, author, comment.id),
                None => println!("     💬 {} ({})", comment.content, comment.id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_path() {
        assert_eq!(document_path("./notes/a.md"), "notes/a.md");
        assert_eq!(document_path("notes\\a.md"), "notes/a.md");
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        assert!(Workspace::open(dir.path()).is_err());

        init(dir.path(), false).unwrap();
        assert!(init(dir.path(), false).is_err());
        assert!(init(dir.path(), true).is_ok());
        assert!(Workspace::open(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_comment_then_list() {
        let dir = TempDir::new().unwrap();
        init(dir.path(), false).unwrap();
        std::fs::write(dir.path().join("a.md"), "see ==alpha== and ==beta==").unwrap();

        let add = CommentCommand::Add(super::super::CommentAddArgs {
            file: "a.md".to_string(),
            content: "note".to_string(),
            id: None,
            text: Some("alpha".to_string()),
            occurrence: 1,
            author: None,
        });
        comment(dir.path(), &add, OutputFormat::Text).await.unwrap();

        let listed = list(dir.path(), None, true, OutputFormat::Json).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "alpha");
        assert_eq!(listed[0].comments[0].content, "note");

        let found = search(dir.path(), "note", OutputFormat::Text).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
