//! Command-line front end: argument parsing and command dispatch.
//!
//! Flags override values from the resolved [`Config`].

mod output;

pub use output::OutputFormat;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::embedder::hashing::HashEmbedder;
use crate::error::Error;
use crate::indexer::Indexer;
use crate::location::IndexLocation;
use crate::search::{SearchEngine, SearchType};

#[derive(Parser, Debug)]
#[command(name = "codesearch")]
#[command(about = "Index a source tree and search it by text, pattern or meaning")]
#[command(version)]
pub struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Config file (JSON)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build or update the index
    Index(IndexArgs),
    /// Search the index
    Search(SearchArgs),
    /// Show index statistics
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Delete the index
    Drop,
}

#[derive(clap::Args, Debug, Default)]
pub struct IndexArgs {
    /// Re-index every file, ignoring previous results
    #[arg(long)]
    pub force: bool,

    /// Include dot-files and dot-directories
    #[arg(long)]
    pub include_hidden: bool,

    /// Skip files larger than this many bytes
    #[arg(long, value_name = "N")]
    pub max_file_size: Option<u64>,

    /// Lines per chunk
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Lines shared by consecutive chunks
    #[arg(long, value_name = "N")]
    pub chunk_overlap: Option<usize>,

    /// Worker count
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Extra exclude glob (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    pub excludes: Vec<String>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Search query (quote multi-word queries)
    pub query: String,

    /// Max results
    #[arg(short = 'n', long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Minimum relevance in [0, 1]
    #[arg(short = 't', long, value_name = "F")]
    pub threshold: Option<f32>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Attach surrounding lines to each result
    #[arg(long)]
    pub with_context: bool,

    /// Only search files whose path matches this regex
    #[arg(long, value_name = "RE")]
    pub file_pattern: Option<String>,

    /// Only search files in this language
    #[arg(short = 'l', long, value_name = "NAME")]
    pub language: Option<String>,

    /// Force a strategy instead of auto-detecting one
    #[arg(long, value_name = "TYPE")]
    pub search_type: Option<SearchType>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Run a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let root = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config = load_config(cli.config.as_deref(), &root)?;
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(config.model.dimensions));

    match cli.command {
        Command::Index(args) => cmd_index(&root, &config, embedder, &args).await,
        Command::Search(args) => cmd_search(&root, &config, embedder, &args),
        Command::Status { format } => {
            let status = Indexer::new(embedder).status(&root)?;
            output::print_status(&status, format)
        }
        Command::Drop => {
            let location = IndexLocation::for_repo(&root)?;
            if Indexer::new(embedder).drop_at(&location)? {
                println!("Dropped index at {}", location.index_dir().display());
            } else {
                println!("No index at {}", location.index_dir().display());
            }
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    let config = Config::resolve(explicit, root)
        .map_err(|e| Error::bad_request("config", format!("{e:#}")))?;
    config
        .validate()
        .map_err(|e| Error::bad_request("config", format!("{e:#}")))?;
    debug!(?config, "effective configuration");
    Ok(config)
}

async fn cmd_index(root: &Path, config: &Config, embedder: Arc<dyn Embedder>, args: &IndexArgs) -> Result<()> {
    let mut opts = config.index_options();
    opts.force = args.force;
    opts.include_hidden |= args.include_hidden;
    if let Some(n) = args.max_file_size {
        opts.max_file_size = n;
    }
    if let Some(n) = args.chunk_size {
        opts.chunk_size = n;
    }
    if let Some(n) = args.chunk_overlap {
        opts.chunk_overlap = n;
    }
    if let Some(n) = args.max_concurrency {
        opts.max_concurrency = n;
    }
    opts.extra_excludes.extend(args.excludes.iter().cloned());
    opts.deadline = args.timeout.map(Duration::from_secs);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Indexing {}", root.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = Indexer::new(embedder).build(root, &opts).await;
    spinner.finish_and_clear();

    match result {
        Ok(stats) => {
            output::print_index_stats(&stats);
            Ok(())
        }
        Err(Error::Timeout { stats: Some(stats) }) => {
            warn!("indexing stopped at the deadline; partial results were saved");
            output::print_index_stats(&stats);
            Err(Error::Timeout { stats: None }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_search(root: &Path, config: &Config, embedder: Arc<dyn Embedder>, args: &SearchArgs) -> Result<()> {
    let mut query = config.search_query(args.query.as_str());
    if let Some(n) = args.max_results {
        query = query.with_max_results(n);
    }
    if let Some(t) = args.threshold {
        query = query.with_threshold(t);
    }
    if args.with_context {
        query = query.with_context(config.search.context_lines);
    }
    if let Some(p) = &args.file_pattern {
        query = query.with_file_filter(p.as_str());
    }
    if let Some(l) = &args.language {
        query = query.with_language(l.as_str());
    }
    if let Some(t) = args.search_type {
        query = query.with_search_type(t);
    }
    if let Some(secs) = args.timeout {
        query = query.with_deadline(Duration::from_secs(secs));
    }

    let location = IndexLocation::for_repo(root)?;
    let results = SearchEngine::new(embedder).search(&query, &location)?;
    if results.truncated {
        warn!("search stopped at the deadline; results are partial");
    }
    output::print_results(&results, args.format)
}
