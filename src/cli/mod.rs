//! CLI interface using clap
//!
//! Provides the command-line interface for marginalia

mod commands;

pub use commands::*;

use clap::{Parser, Subcommand};

/// Marginalia - highlights and comments that survive edits
#[derive(Parser, Debug)]
#[command(name = "marginalia")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the document corpus (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub path: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize marginalia in a directory
    Init(InitArgs),

    /// Build the highlight index and show statistics
    Index,

    /// List highlights
    List(ListArgs),

    /// Search highlight text and comments
    Search(SearchArgs),

    /// Add, edit or delete comments
    #[command(subcommand)]
    Comment(CommentCommand),

    /// Watch for changes and keep the index up to date
    Watch(WatchArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force re-initialization
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only list highlights in this document
    pub file: Option<String>,

    /// Only list highlights with comments
    #[arg(short, long)]
    pub commented: bool,
}

/// Arguments for search command
#[derive(Parser, Debug)]
pub struct SearchArgs {
    /// Search term; every word must appear in the text or a comment
    pub term: String,
}

/// Comment subcommands
#[derive(Subcommand, Debug)]
pub enum CommentCommand {
    /// Comment on a highlight
    Add(CommentAddArgs),

    /// Comment on a whole document
    File(CommentFileArgs),

    /// Replace the content of a comment
    Edit(CommentEditArgs),

    /// Delete a comment
    Delete(CommentDeleteArgs),
}

/// Arguments for comment add
#[derive(Parser, Debug)]
pub struct CommentAddArgs {
    /// Document containing the highlight
    pub file: String,

    /// Comment text
    pub content: String,

    /// Highlight id, as shown by `list`
    #[arg(long, conflicts_with = "text", required_unless_present = "text")]
    pub id: Option<String>,

    /// Highlighted text to comment on
    #[arg(long)]
    pub text: Option<String>,

    /// Which occurrence of --text, starting at 1
    #[arg(long, default_value = "1")]
    pub occurrence: usize,

    /// Comment author
    #[arg(short, long)]
    pub author: Option<String>,
}

/// Arguments for comment file
#[derive(Parser, Debug)]
pub struct CommentFileArgs {
    /// Document to comment on
    pub file: String,

    /// Comment text
    pub content: String,

    /// Comment author
    #[arg(short, long)]
    pub author: Option<String>,
}

/// Arguments for comment edit
#[derive(Parser, Debug)]
pub struct CommentEditArgs {
    pub file: String,
    pub annotation_id: String,
    pub comment_id: String,
    /// New comment text
    pub content: String,
}

/// Arguments for comment delete
#[derive(Parser, Debug)]
pub struct CommentDeleteArgs {
    pub file: String,
    pub annotation_id: String,
    pub comment_id: String,
}

/// Arguments for watch command
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Poll interval in milliseconds, for watchers that poll
    #[arg(short, long, default_value = "1000")]
    pub debounce: u64,

    /// Build the index immediately instead of after the startup delay
    #[arg(long)]
    pub now: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Get a configuration value
    #[arg(long)]
    pub get: Option<String>,

    /// Reset to defaults
    #[arg(long)]
    pub reset: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["marginalia", "search", "rust ownership", "-o", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);

        if let Commands::Search(args) = cli.command {
            assert_eq!(args.term, "rust ownership");
        } else {
            panic!("expected search");
        }
    }

    #[test]
    fn test_init_command() {
        let cli = Cli::parse_from(["marginalia", "init", "--force"]);
        if let Commands::Init(args) = cli.command {
            assert!(args.force);
        }
    }

    #[test]
    fn test_comment_add_requires_anchor() {
        assert!(Cli::try_parse_from(["marginalia", "comment", "add", "a.md", "note"]).is_err());
        assert!(Cli::try_parse_from([
            "marginalia", "comment", "add", "a.md", "note", "--id", "x", "--text", "y"
        ])
        .is_err());

        let cli = Cli::parse_from([
            "marginalia", "comment", "add", "a.md", "note", "--text", "alpha", "--occurrence", "2",
        ]);
        match cli.command {
            Commands::Comment(CommentCommand::Add(args)) => {
                assert_eq!(args.text.as_deref(), Some("alpha"));
                assert_eq!(args.occurrence, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
