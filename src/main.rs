//! # WMS Harvest CLI (`wmsh`)
//!
//! The `wmsh` binary drives the harvest pipeline from the command line.
//!
//! ## Usage
//!
//! ```bash
//! wmsh [--config ./wmsh.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wmsh harvest --csw-url <URL>` | Harvest one catalogue into `wms_layers.csv` |
//! | `wmsh harvest --csw-list <FILE>` | Harvest every endpoint listed in a CSV |
//! | `wmsh check-sources <FILE>` | Probe listed endpoints, write `<name>_valid.csv` |
//!
//! ## Examples
//!
//! ```bash
//! # Harvest a single catalogue, validating layers with sample renders
//! wmsh harvest --csw-url https://example.org/csw --out-dir ./out
//!
//! # Quick metadata-only pass over the first 50 records
//! wmsh harvest --csw-url https://example.org/csw --out-dir ./out \
//!     --limit 50 --skip-getmap
//!
//! # Pre-flight a list of catalogues before a long run
//! wmsh check-sources sources.csv
//! ```

use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use wms_harvest::config::{self, Config};
use wms_harvest::csw::CswClient;
use wms_harvest::models::ServiceType;
use wms_harvest::pipeline::{self, RunOptions};
use wms_harvest::sources;
use wms_harvest::wms::WmsClient;

/// WMS Harvest CLI — harvest OGC catalogues into a flat layer CSV.
#[derive(Parser)]
#[command(
    name = "wmsh",
    about = "Harvest CSW catalogues, resolve WMS layers, and flatten them into CSV",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. `info`, `wms_harvest=debug`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Harvest one or more catalogues into `wms_layers.csv`.
    ///
    /// Probes each endpoint, walks its records page by page with the
    /// worker pool, resolves WMS references to their best-matching named
    /// layer, and writes one CSV row per record/WMS-reference pair.
    Harvest(HarvestArgs),

    /// Probe every endpoint in a CSV list and keep the reachable ones.
    ///
    /// Writes the endpoints that answered a GetRecords probe to a
    /// sibling `<name>_valid.csv`, ready for `harvest --csw-list`.
    CheckSources {
        /// CSV file with a `url` column of catalogue endpoints.
        list: PathBuf,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["csw_url", "csw_list"])))]
struct HarvestArgs {
    /// A single CSW catalogue endpoint to harvest.
    #[arg(long)]
    csw_url: Option<String>,

    /// CSV file with a `url` column of catalogue endpoints.
    #[arg(long)]
    csw_list: Option<PathBuf>,

    /// Directory for the output CSV and sample render images.
    #[arg(long, default_value = "./harvest_output")]
    out_dir: PathBuf,

    /// Stop after this many records per catalogue.
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Skip sample GetMap renders; harvest metadata and matches only.
    #[arg(long)]
    skip_getmap: bool,

    /// Keep files already present in the output directory.
    #[arg(long)]
    keep_output: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Harvest(args) => run_harvest_command(&cfg, args).await,
        Commands::CheckSources { list } => run_check_sources(&cfg, &list).await,
    }
}

async fn run_harvest_command(cfg: &Config, args: HarvestArgs) -> Result<()> {
    let endpoints = match (&args.csw_url, &args.csw_list) {
        (Some(url), _) => vec![url.clone()],
        (None, Some(list)) => sources::load_endpoint_list(list)?,
        (None, None) => unreachable!("clap enforces the source group"),
    };

    pipeline::prepare_output_dir(&args.out_dir, !args.keep_output)?;

    let catalogue = Arc::new(CswClient::new(
        cfg.http.csw_timeout(),
        cfg.harvest.page_size,
    )?);
    let maps = Arc::new(WmsClient::new(cfg.http.wms_timeout(), cfg.getmap.timeout())?);

    let options = RunOptions {
        target: ServiceType::WmsCapabilities,
        record_limit: args.limit,
        validate_layers: !args.skip_getmap,
        out_dir: args.out_dir.clone(),
    };

    let summary = pipeline::run_harvest(catalogue, maps, cfg, &endpoints, &options).await?;

    println!(
        "Harvested {} endpoint(s): {} page job(s) ({} failed), {} row(s) written to {}",
        summary.endpoints - summary.endpoints_failed,
        summary.jobs,
        summary.jobs_failed,
        summary.rows_written,
        summary.output_csv.display()
    );
    if summary.endpoints_failed > 0 {
        println!("{} endpoint(s) were unavailable and skipped.", summary.endpoints_failed);
    }
    if !summary.duplicate_services.is_empty() {
        println!(
            "{} WMS URL(s) appeared in more than one row:",
            summary.duplicate_services.len()
        );
        for url in &summary.duplicate_services {
            println!("  {}", url);
        }
    }

    Ok(())
}

async fn run_check_sources(cfg: &Config, list: &PathBuf) -> Result<()> {
    let catalogue = CswClient::new(cfg.http.csw_timeout(), cfg.harvest.page_size)?;
    let report = sources::check_sources(&catalogue, list).await?;

    for check in &report.checks {
        match (&check.total_matches, &check.error) {
            (Some(total), _) => println!("OK      {} ({} records)", check.url, total),
            (None, Some(error)) => println!("FAILED  {} ({})", check.url, error),
            (None, None) => println!("FAILED  {}", check.url),
        }
    }
    println!(
        "{}/{} endpoint(s) usable, written to {}",
        report.ok_count(),
        report.checks.len(),
        report.output_csv.display()
    );

    Ok(())
}
