//! # trailscout CLI
//!
//! ```bash
//! trailscout --config ./config/trailscout.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trailscout init` | Create the SQLite database and schema |
//! | `trailscout search "<query>" --location <place>` | Search, fetching the region on a miss |
//! | `trailscout scrape <place>` | Fetch trails around a place |
//! | `trailscout list` | List stored trails |
//! | `trailscout count` | Number of stored trails |
//! | `trailscout serve` | Start the HTTP tool server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use trailscout::config::{self, Config};
use trailscout::search::SearchRequest;
use trailscout::{cli, migrate, server};

/// Location-aware hiking trail search that fetches regions on demand.
#[derive(Parser)]
#[command(name = "trailscout", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trailscout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// Search stored trails.
    ///
    /// With `--location`, a miss fetches trails around the location,
    /// waits for the fetch, and searches again.
    Search {
        query: String,

        /// Place name or `lat,lon`.
        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        radius: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,

        /// Only search what is already stored.
        #[arg(long)]
        no_lazy_scrape: bool,

        /// Refetch the region before searching.
        #[arg(long)]
        rescrape: bool,

        /// Print the raw response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Fetch trails around a place and wait for the fetch to finish.
    Scrape {
        /// Place name or `lat,lon`.
        region: String,

        /// Fetch radius in miles (defaults to `search.scrape_radius_miles`).
        #[arg(long)]
        radius: Option<f64>,

        /// Refetch even if the region is already loaded.
        #[arg(long)]
        rescrape: bool,
    },

    /// List every stored trail.
    List {
        #[arg(long)]
        json: bool,
    },

    /// Print the number of stored trails.
    Count,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.store.path.display());
        }
        Commands::Search {
            query,
            location,
            radius,
            limit,
            no_lazy_scrape,
            rescrape,
            json,
        } => {
            let request = SearchRequest {
                query,
                location,
                radius_miles: radius,
                limit,
                lazy_scrape: !no_lazy_scrape,
                rescrape,
            };
            cli::run_search(&cfg, request, json).await?;
        }
        Commands::Scrape {
            region,
            radius,
            rescrape,
        } => {
            cli::run_scrape(&cfg, &region, radius, rescrape).await?;
        }
        Commands::List { json } => {
            cli::run_list(&cfg, json).await?;
        }
        Commands::Count => {
            cli::run_count(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
