//! Marginalia - highlights and comments that survive document edits

use anyhow::Result;
use marginalia::cli::{self, Cli, Commands};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Get corpus path
    let root = Path::new(&cli.path);

    // Execute command
    match cli.command {
        Commands::Init(args) => {
            cli::init(root, args.force)?;
        }

        Commands::Index => {
            cli::index(root, cli.format).await?;
        }

        Commands::List(args) => {
            cli::list(root, args.file.as_deref(), args.commented, cli.format).await?;
        }

        Commands::Search(args) => {
            cli::search(root, &args.term, cli.format).await?;
        }

        Commands::Comment(command) => {
            cli::comment(root, &command, cli.format).await?;
        }

        Commands::Watch(args) => {
            cli::watch(root, args.debounce, args.now).await?;
        }

        Commands::Config(args) => {
            cli::config(root, &args)?;
        }
    }

    Ok(())
}
