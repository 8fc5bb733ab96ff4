//! analysis-worker: runs the registered analysis algorithms against a tile
//! dump.
//!
//! `list` prints the registered algorithms and their parameter schemas.
//! `run` invokes one algorithm, optionally as several concurrent requests
//! sharing the job slot pool, and prints the first successful result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::task::JoinSet;
use tracing::{info, warn};

use tilestat_compute::{algorithms, AlgorithmRegistry, Handlers, LocalEngine};
use tilestat_core::config::load_dotenv;
use tilestat_core::{BoundingBox, ComputeOptions, Config, MemoryTileStore, TileService};

// ── CLI ─────────────────────────────────────────────────────────────

/// Tile analysis worker: area-averaged statistics over gridded datasets.
#[derive(Parser, Debug)]
#[command(name = "analysis-worker", version, about)]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, env = "TILESTAT_CONFIG")]
    config: Option<PathBuf>,

    /// JSON tile dump to serve. Overrides the configured dump path.
    #[arg(long)]
    tiles: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered algorithms.
    List,
    /// Invoke one algorithm.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Algorithm path, e.g. /timeSeries.
    path: String,

    /// Comma-separated dataset shortnames.
    #[arg(long, value_delimiter = ',', required = true)]
    ds: Vec<String>,

    #[arg(long, default_value_t = -90.0, allow_hyphen_values = true)]
    min_lat: f64,

    #[arg(long, default_value_t = 90.0, allow_hyphen_values = true)]
    max_lat: f64,

    #[arg(long, default_value_t = -180.0, allow_hyphen_values = true)]
    min_lon: f64,

    #[arg(long, default_value_t = 180.0, allow_hyphen_values = true)]
    max_lon: f64,

    /// Start of the time range (RFC 3339).
    #[arg(long)]
    start_time: DateTime<Utc>,

    /// End of the time range (RFC 3339).
    #[arg(long)]
    end_time: DateTime<Utc>,

    /// Partition count. 0 uses the engine default.
    #[arg(long, default_value_t = 0)]
    nparts: usize,

    /// Number of concurrent requests to issue.
    #[arg(long, default_value_t = 1)]
    requests: usize,
}

impl RunArgs {
    fn options(&self) -> ComputeOptions {
        ComputeOptions::builder()
            .datasets(self.ds.iter().map(|s| s.trim()))
            .bounding_box(BoundingBox::new(
                self.min_lon,
                self.min_lat,
                self.max_lon,
                self.max_lat,
            ))
            .time_range(self.start_time, self.end_time)
            .nparts(self.nparts)
            .build()
    }
}

// ── Commands ────────────────────────────────────────────────────────

async fn run(handlers: &Handlers, args: RunArgs) -> anyhow::Result<()> {
    let handler = handlers
        .get(&args.path)
        .with_context(|| format!("no algorithm registered at {}", args.path))?;
    let options = args.options();

    let mut requests = JoinSet::new();
    for _ in 0..args.requests.max(1) {
        let handler = Arc::clone(&handler);
        let options = options.clone();
        requests.spawn_blocking(move || handler.calc(&options));
    }

    let (mut ok, mut busy, mut failed) = (0usize, 0usize, 0usize);
    while let Some(joined) = requests.join_next().await {
        match joined? {
            Ok(output) => {
                ok += 1;
                if ok == 1 {
                    println!("{}", output.to_json()?);
                }
            }
            Err(e) if e.is_retryable() => {
                busy += 1;
                warn!(status = e.status_code(), "{e}");
            }
            Err(e) => {
                failed += 1;
                warn!(status = e.status_code(), error = %e, "request failed");
            }
        }
    }

    info!(ok, busy, failed, pool = ?handlers.pool_snapshot(), "run finished");
    anyhow::ensure!(ok > 0, "no request succeeded");
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    load_dotenv();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(dump) = cli.tiles {
        config.tiles.dump_path = Some(dump);
    }
    config.log_summary();

    let tiles: Arc<dyn TileService> = match &config.tiles.dump_path {
        Some(path) => Arc::new(
            MemoryTileStore::from_json_file(path)
                .with_context(|| format!("failed to load tiles from {}", path.display()))?,
        ),
        None => {
            warn!("no tile dump configured, serving an empty store");
            Arc::new(MemoryTileStore::new())
        }
    };
    let engine = Arc::new(LocalEngine::new(config.jobs.resolved_worker_threads())?);

    let mut registry = AlgorithmRegistry::new();
    algorithms::register_builtin(&mut registry, tiles)?;
    let handlers = registry.freeze(&config, engine)?;
    info!(algorithms = handlers.len(), "analysis-worker ready");

    match cli.command {
        Command::List => {
            println!("{}", serde_json::to_string_pretty(&handlers.capabilities())?);
        }
        Command::Run(args) => run(&handlers, args).await?,
    }
    Ok(())
}
