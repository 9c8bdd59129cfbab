//! # Phaply CLI (`phaply`)
//!
//! ## Usage
//!
//! ```bash
//! phaply --config ./config/phaply.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `phaply init` | Create the SQLite database and run schema migrations |
//! | `phaply import <file.jsonl>` | Upsert legal documents from JSON Lines |
//! | `phaply rebuild` | Rebuild the retrieval artifacts from the document store |
//! | `phaply embed` | Backfill child-chunk embeddings |
//! | `phaply retrieve "<query>"` | Show the parent chunks retrieved for a query |
//! | `phaply ask "<query>"` | Answer a question with cited sources |
//! | `phaply serve` | Start the HTTP query API |
//! | `phaply stats` | Show document, artifact and embedding counts |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default
//! `phaply=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use phaply::{config, document_store, embed_cmd, migrate, rebuild, retrieve, server, stats};

/// Phaply: question answering over Vietnamese legal documents.
#[derive(Parser)]
#[command(
    name = "phaply",
    about = "Phaply: question answering over Vietnamese legal documents",
    version,
    long_about = "Phaply chunks a corpus of Vietnamese legal documents into parent and child \
    chunks, indexes the children with BM25 over segmented words (plus optional embeddings), \
    and answers questions with a language model, citing the documents it used."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/phaply.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import documents from a JSON Lines file.
    ///
    /// Each line: `{"id", "title", "content", "metadata": {...}}`. Records
    /// are upserted by id; unchanged records are skipped.
    Import {
        /// Path to the `.jsonl` file.
        file: PathBuf,
    },

    /// Rebuild the retrieval artifacts and overwrite the cache.
    ///
    /// Fails without touching the existing cache if any document fails to
    /// index, or if another rebuild holds the lock.
    Rebuild,

    /// Embed child chunks of the current artifacts.
    Embed {
        /// Override `embedding.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Re-embed every child, not only new or changed ones.
        #[arg(long)]
        full: bool,
    },

    /// Show the parent chunks retrieved for a query.
    Retrieve {
        query: String,

        /// Maximum number of parents to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        query: String,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP query API on `[server].bind`.
    Serve,

    /// Show document, artifact and embedding counts.
    Stats,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("phaply=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            document_store::run_import(&cfg, &file).await?;
        }
        Commands::Rebuild => {
            rebuild::run_rebuild(&cfg).await?;
        }
        Commands::Embed { batch_size, full } => {
            embed_cmd::run_embed(&cfg, batch_size, full).await?;
        }
        Commands::Retrieve { query, limit } => {
            retrieve::run_retrieve(&cfg, &query, limit).await?;
        }
        Commands::Ask { query, json } => {
            retrieve::run_ask(&cfg, &query, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
