//! # SafeSteps CLI (`steps`)
//!
//! ```bash
//! steps --config ./config/steps.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `steps init` | Create the SQLite database and run schema migrations |
//! | `steps ingest <csv>` | Parse, enrich, and store a crash export |
//! | `steps embed` | Embed stored records missing a current embedding |
//! | `steps search "<query>"` | Search stored crash documents |
//! | `steps get <id>` | Print one stored document as JSON |
//! | `steps risk <lat> <lng>` | Area risk around a point |
//! | `steps export` | Dump every document as NDJSON |
//! | `steps stats` | Record counts and recent ingest runs |
//! | `steps serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG=safesteps=debug` for per-record detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use safesteps::config::{self, OnError};
use safesteps::ingest::{self, IngestOptions};
use safesteps::safesteps_core::models::GeoPoint;
use safesteps::search::{self, NearFilter, SearchOptions, SearchStrategy};
use safesteps::{embed_cmd, export, get, migrate, risk, server, stats};

/// SafeSteps CLI: pedestrian-safety crash record ingestion and retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/steps.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "steps",
    about = "SafeSteps: ingest, enrich, and search pedestrian crash records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/steps.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a crash CSV export.
    ///
    /// Each row is parsed, enriched with a factor embedding and a risk
    /// score, and upserted by document ID. Rows that fail at any stage are
    /// reported as rejections.
    Ingest {
        /// CSV file with a header row.
        path: PathBuf,

        /// Parse and validate only; nothing is embedded or written.
        #[arg(long)]
        dry_run: bool,

        /// Read at most this many data rows.
        #[arg(long)]
        limit: Option<usize>,

        /// Override `ingest.on_error` (skip or abort).
        #[arg(long)]
        on_error: Option<OnError>,

        /// Override `ingest.concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write rejected rows to this CSV file.
        #[arg(long)]
        rejects: Option<PathBuf>,
    },

    /// Embed stored records that have no embedding from the configured model.
    Embed {
        /// Maximum number of records to embed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search stored crash documents.
    Search {
        /// Free-text query matched against contributing factors and borough.
        query: String,

        /// keyword, semantic, or hybrid.
        #[arg(long, default_value = "keyword")]
        mode: SearchStrategy,

        /// Only crashes in this borough (case-insensitive).
        #[arg(long)]
        borough: Option<String>,

        /// Only crashes near `LAT,LNG`.
        #[arg(long, value_parser = search::parse_near, allow_hyphen_values = true)]
        near: Option<GeoPoint>,

        /// Radius in meters for `--near` (default `retrieval.near_radius_m`).
        #[arg(long, requires = "near")]
        radius: Option<f64>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a stored crash document by ID.
    Get {
        id: String,
    },

    /// Summarize crash risk around a point.
    #[command(allow_negative_numbers = true)]
    Risk {
        lat: f64,
        lng: f64,

        /// Radius in meters (default `retrieval.near_radius_m`).
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Export every stored document as newline-delimited JSON.
    Export {
        /// Output file (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP API server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            dry_run,
            limit,
            on_error,
            concurrency,
            rejects,
        } => {
            let mut options = IngestOptions::from_config(&cfg);
            options.dry_run = dry_run;
            options.limit = limit;
            options.rejects = rejects;
            if let Some(on_error) = on_error {
                options.on_error = on_error;
            }
            if let Some(concurrency) = concurrency {
                if concurrency == 0 {
                    anyhow::bail!("--concurrency must be >= 1");
                }
                options.concurrency = concurrency;
            }
            let report = ingest::run_ingest(&cfg, &path, &options).await?;
            ingest::print_report(&report);
        }
        Commands::Embed { limit } => {
            embed_cmd::run_embed(&cfg, limit).await?;
        }
        Commands::Search {
            query,
            mode,
            borough,
            near,
            radius,
            limit,
            json,
        } => {
            if let Some(limit) = limit {
                if limit < 1 {
                    anyhow::bail!("--limit must be >= 1");
                }
            }
            let radius_m = radius.unwrap_or(cfg.retrieval.near_radius_m);
            if !(radius_m.is_finite() && radius_m > 0.0) {
                anyhow::bail!("--radius must be > 0");
            }
            let opts = SearchOptions {
                mode,
                borough,
                near: near.map(|center| NearFilter { center, radius_m }),
                limit,
            };
            search::run_search(&cfg, &query, &opts, json).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Risk { lat, lng, radius } => {
            risk::run_risk(&cfg, lat, lng, radius).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
