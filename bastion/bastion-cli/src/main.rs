//! Bastion CLI - scoped question answering over a document corpus.
//!
//! # Usage
//!
//! ```bash
//! # Answer a question as a FINANCE caller
//! bastion ask "What was revenue growth?" --corpus corpus.json --department FINANCE
//!
//! # Restrict to pinned files and show evidence
//! bastion ask "Summarize the plan" --corpus corpus.json --department FINANCE \
//!     --file plan.txt --enhanced
//!
//! # Inspect a filter expression
//! bastion parse-filter "department == 'FINANCE' && source in ['Q4.txt']"
//! ```

use anyhow::Result;
use bastion_cli::{commands, output, OutputFormat};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "bastion")]
#[command(about = "Bastion - department-scoped retrieval and gated answers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BASTION_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (human, json, plain)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the caller's documents
    Ask {
        /// The question
        query: String,

        /// JSON corpus file
        #[arg(long)]
        corpus: PathBuf,

        /// Caller's department
        #[arg(short, long)]
        department: String,

        /// Caller's workspace
        #[arg(short, long)]
        workspace: Option<String>,

        /// Restrict retrieval to these files (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Show sources, strategies and gate metrics
        #[arg(short, long)]
        enhanced: bool,
    },

    /// Raw similarity search with an optional filter expression
    Search {
        /// Search text
        query: String,

        /// JSON corpus file
        #[arg(long)]
        corpus: PathBuf,

        /// Filter expression, e.g. "department == 'FINANCE'"
        #[arg(long)]
        filter: Option<String>,

        /// Maximum results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,
    },

    /// Parse a filter expression and print its canonical form
    ParseFilter {
        /// Filter expression
        expression: String,
    },

    /// Delete documents by id and rewrite the corpus file
    Delete {
        /// JSON corpus file
        #[arg(long)]
        corpus: PathBuf,

        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref()).await?;

    // Initialize logging
    init_logging(cli.verbose, &config.general.log_level);

    let format = OutputFormat::from(cli.format);

    let rendered = match cli.command {
        Commands::Ask {
            query,
            corpus,
            department,
            workspace,
            files,
            enhanced,
        } => {
            let scope = commands::caller_scope(&department, workspace.as_deref());
            commands::ask(config, &corpus, &query, &scope, &files, enhanced, format).await?
        }

        Commands::Search {
            query,
            corpus,
            filter,
            top_k,
        } => commands::search(config, &corpus, &query, filter.as_deref(), top_k, format).await?,

        Commands::ParseFilter { expression } => commands::parse_filter(&expression, format)?,

        Commands::Delete { corpus, ids } => {
            let rendered = commands::delete(config, &corpus, &ids, format).await?;
            if format == OutputFormat::Human {
                output::success(&rendered);
                return Ok(());
            }
            rendered
        }
    };

    output::emit(&rendered, format);
    Ok(())
}

fn init_logging(verbose: bool, default_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("bastion=debug,bastion_cli=debug,bastion_semantic=debug,bastion_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "bastion={0},bastion_cli={0},bastion_semantic={0},bastion_core={0},warn",
                default_level
            ))
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
