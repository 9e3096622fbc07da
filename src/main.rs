//! # Passage Store CLI (`pstore`)
//!
//! The `pstore` binary is the primary interface for the passage store. It
//! runs the HTTP service and provides direct commands against the on-disk
//! snapshot for scripting and inspection.
//!
//! ## Usage
//!
//! ```bash
//! pstore --config ./config/pstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pstore serve` | Start the HTTP service |
//! | `pstore add <text>...` | Ingest passages into the store |
//! | `pstore query <text>` | Rank stored passages against a query |
//! | `pstore stats` | Print store statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use passage_store::config::{self, Config};
use passage_store::embedding::create_provider;
use passage_store::ingest::ingest_batch;
use passage_store::persist;
use passage_store::query::run_query;

/// Passage Store — an in-memory embedding store and similarity-query service
/// for text passages.
#[derive(Parser)]
#[command(
    name = "pstore",
    about = "Passage Store — an embedding store and similarity-query service for text passages",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Missing file falls back to built-in defaults. Provider credentials
    /// come from the environment (`OPENAI_API_KEY`).
    #[arg(long, global = true, default_value = "./config/pstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service.
    ///
    /// Loads the persisted store, spawns the snapshot/reset housekeeping
    /// loop, and serves `/add`, `/query`, and `/health` until SIGINT.
    /// The store is flushed to disk on shutdown.
    Serve,

    /// Ingest passages directly into the on-disk store.
    ///
    /// Each argument is one passage. Duplicates and boilerplate sections are
    /// skipped by the same policy the service applies.
    Add {
        /// Passages to ingest.
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// Embed a query and print the closest stored passages.
    Query {
        /// The query text.
        text: String,
    },

    /// Print store statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => run_serve(&cfg).await?,
        Commands::Add { texts } => run_add(&cfg, texts).await?,
        Commands::Query { text } => run_query_cmd(&cfg, &text).await?,
        Commands::Stats => run_stats(&cfg),
    }

    Ok(())
}

async fn run_serve(cfg: &Config) -> anyhow::Result<()> {
    let store = Arc::new(persist::load(&cfg.store.data_dir, cfg.embedding.dims));
    let provider = create_provider(&cfg.embedding)?;
    passage_store::server::run_server(cfg, store, provider).await
}

async fn run_add(cfg: &Config, texts: Vec<String>) -> anyhow::Result<()> {
    let store = persist::load(&cfg.store.data_dir, cfg.embedding.dims);
    let provider = create_provider(&cfg.embedding)?;
    let budget = Duration::from_secs(cfg.ingest.time_budget_secs);

    let outcome = ingest_batch(&store, provider.as_ref(), &texts, budget).await;
    persist::save(&store.snapshot(), &cfg.store.data_dir)?;

    println!("added: {}", outcome.added);
    println!("skipped: {}", outcome.skipped);
    if outcome.failed > 0 {
        println!("failed: {}", outcome.failed);
    }
    if outcome.out_of_time {
        println!("stopped early: time budget exhausted");
    }
    Ok(())
}

async fn run_query_cmd(cfg: &Config, text: &str) -> anyhow::Result<()> {
    let store = persist::load(&cfg.store.data_dir, cfg.embedding.dims);
    let provider = create_provider(&cfg.embedding)?;

    let items = run_query(&store, provider.as_ref(), &cfg.retrieval, text).await?;
    if items.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for (i, item) in items.iter().enumerate() {
        println!("{}. {}", i + 1, item);
    }
    Ok(())
}

fn run_stats(cfg: &Config) {
    let store = persist::load(&cfg.store.data_dir, cfg.embedding.dims);
    let (records, by_embedding, content_hashes) = store.cardinalities();

    println!("data dir: {}", cfg.store.data_dir.display());
    println!("records: {}", records);
    println!("dims: {}", store.dims());
    if records != by_embedding || records != content_hashes {
        println!(
            "WARNING: index cardinalities disagree (records={}, embedding index={}, content hashes={})",
            records, by_embedding, content_hashes
        );
    }
}
