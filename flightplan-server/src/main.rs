//! flightplan: batch ingestion of flight-plan exports.
//!
//! Subcommands:
//! - `process`: run the pipeline and write the final table as CSV
//! - `load`: load a final-table CSV into the store
//! - `ingest`: pipeline and load in one batch
//! - `resolve`: resolve one coordinate and show the cascade step
//! - `stats`: store totals and flights per region
//! - `config`: print or write the configuration file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use flightplan_core::config::{self, Config};
use flightplan_core::types::GeoPoint;
use flightplan_core::{Gazetteer, RegionIdMap, RegionResolver};

mod db;
#[cfg(feature = "postgres")]
mod db_pg;
mod loader;
mod logging;
mod pipeline;

use db::{FlightStore, SqliteStore};
use loader::LoadReport;
use pipeline::{Pipeline, PipelineOutput, StageReport};

#[derive(Parser)]
#[command(name = "flightplan", version, about = "Flight-plan batch ingestion")]
struct Cli {
    /// Config file [default: ~/.flightplan/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Region polygons (GeoJSON FeatureCollection)
    #[arg(long, global = true, env = "FLIGHTPLAN_GAZETTEER")]
    gazetteer: Option<String>,

    /// Region id reference; defaults to the gazetteer file
    #[arg(long, global = true)]
    region_ids: Option<String>,

    /// SQLite database path
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// PostgreSQL URL (requires the `postgres` feature)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over a source file and write the final table
    Process {
        /// Source file (.xlsx, .xls, .ods, .csv, ...)
        input: PathBuf,

        /// Output CSV [default: <input>.processed.csv]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write every stage's table into this directory
        #[arg(long)]
        keep_intermediates: Option<PathBuf>,
    },

    /// Load a final-table CSV into the store
    Load {
        /// CSV written by `process`
        table: PathBuf,
    },

    /// Process a source file and load the result as one batch
    Ingest {
        /// Source file (.xlsx, .xls, .ods, .csv, ...)
        input: PathBuf,

        /// Also write the final table here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write every stage's table into this directory
        #[arg(long)]
        keep_intermediates: Option<PathBuf>,

        /// Abort and roll back if the batch takes longer than this
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print the region, id and cascade step for a coordinate
    Resolve {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
    },

    /// Show database statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it to ~/.flightplan/config.toml
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match settings(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    let guard = logging::initialize_logging(&config.logging);

    let result = match cli.command {
        Commands::Process {
            input,
            output,
            keep_intermediates,
        } => cmd_process(&config, input, output, keep_intermediates).await,
        Commands::Load { table } => cmd_load(&config, &table).await,
        Commands::Ingest {
            input,
            output,
            keep_intermediates,
            timeout_secs,
        } => cmd_ingest(&config, input, output, keep_intermediates, timeout_secs).await,
        Commands::Resolve { lat, lon } => cmd_resolve(&config, lat, lon),
        Commands::Stats { json } => cmd_stats(&config, json).await,
        Commands::Config { init } => cmd_config(&config, init),
    };

    if let Err(e) = result {
        error!("{e:#}");
        drop(guard);
        std::process::exit(1);
    }
}

/// Config file, then CLI flags and environment on top.
fn settings(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => config::load_config(),
    };
    if let Some(path) = &cli.gazetteer {
        config.gazetteer.path = path.clone();
    }
    if let Some(path) = &cli.region_ids {
        config.gazetteer.region_ids_path = Some(path.clone());
    }
    if let Some(path) = &cli.db_path {
        config.database.path = path.clone();
    }
    if let Some(url) = &cli.database_url {
        config.database.url = Some(url.clone());
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_reference(config: &Config) -> anyhow::Result<(RegionResolver, RegionIdMap)> {
    let gazetteer_path = Path::new(&config.gazetteer.path);
    let gazetteer = Gazetteer::from_path(gazetteer_path)
        .with_context(|| format!("loading gazetteer {}", gazetteer_path.display()))?;
    for skip in gazetteer.skipped() {
        warn!(
            feature = skip.feature,
            region = %skip.region,
            "skipped region geometry: {}",
            skip.reason
        );
    }
    if gazetteer.is_empty() {
        warn!("gazetteer {} holds no regions", gazetteer_path.display());
    }

    let ids_path = config
        .gazetteer
        .region_ids_path
        .as_deref()
        .map(Path::new)
        .unwrap_or(gazetteer_path);
    let ids = RegionIdMap::from_path(ids_path)
        .with_context(|| format!("loading region ids {}", ids_path.display()))?;

    info!(
        regions = gazetteer.len(),
        ids = ids.len(),
        "loaded {}",
        gazetteer_path.display()
    );
    Ok((RegionResolver::new(Arc::new(gazetteer)), ids))
}

fn build_pipeline(config: &Config, keep_intermediates: Option<PathBuf>) -> anyhow::Result<Pipeline> {
    let (resolver, ids) = load_reference(config)?;
    let keep = keep_intermediates.or_else(|| config.pipeline.keep_intermediates.as_ref().map(PathBuf::from));
    Ok(Pipeline::new(resolver, ids)
        .fallback_region_id(config.pipeline.fallback_region_id)
        .keep_intermediates(keep)
        .threads(config.pipeline.threads))
}

async fn open_store(config: &Config) -> anyhow::Result<Box<dyn FlightStore>> {
    if let Some(url) = &config.database.url {
        #[cfg(feature = "postgres")]
        {
            let store = db_pg::PgStore::connect(url)
                .await
                .context("connecting to PostgreSQL")?;
            info!("using PostgreSQL store");
            return Ok(Box::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        warn!(
            "database url {url} ignored: built without the `postgres` feature, using {}",
            config.database.path
        );
    }
    let store = SqliteStore::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path))?;
    Ok(Box::new(store))
}

/// The pipeline is CPU-bound; run it on the blocking pool inside the
/// caller's span.
async fn run_pipeline(pipeline: Pipeline, input: PathBuf) -> anyhow::Result<PipelineOutput> {
    let span = Span::current();
    let output = tokio::task::spawn_blocking(move || span.in_scope(|| pipeline.run(&input)))
        .await
        .context("pipeline task failed")??;
    Ok(output)
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("processed.csv")
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_process(
    config: &Config,
    input: PathBuf,
    output: Option<PathBuf>,
    keep_intermediates: Option<PathBuf>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config, keep_intermediates)?;
    let output_path = output.unwrap_or_else(|| default_output(&input));
    let span = info_span!("batch", id = %Uuid::new_v4(), input = %input.display());

    let out = run_pipeline(pipeline, input).instrument(span.clone()).await?;
    out.table
        .write_csv_path(&output_path)
        .with_context(|| format!("writing {}", output_path.display()))?;
    span.in_scope(|| info!(rows = out.table.len(), "wrote {}", output_path.display()));

    print_stage_reports(&out.reports);
    println!("Output: {} ({} rows)", output_path.display(), out.table.len());
    Ok(())
}

async fn cmd_load(config: &Config, table_path: &Path) -> anyhow::Result<()> {
    let table = flightplan_core::Table::read_csv_rows_path(table_path)
        .with_context(|| format!("reading {}", table_path.display()))?;
    let store = open_store(config).await?;
    let span = info_span!("batch", id = %Uuid::new_v4(), input = %table_path.display());

    let report = loader::load(store.as_ref(), &table)
        .instrument(span)
        .await
        .context("loading batch")?;
    print_load_report(&report);
    Ok(())
}

async fn cmd_ingest(
    config: &Config,
    input: PathBuf,
    output: Option<PathBuf>,
    keep_intermediates: Option<PathBuf>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(config, keep_intermediates)?;
    let store = open_store(config).await?;
    let span = info_span!("batch", id = %Uuid::new_v4(), input = %input.display());

    let batch = async {
        let out = run_pipeline(pipeline, input).await?;
        if let Some(path) = &output {
            out.table
                .write_csv_path(path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        let report = loader::load(store.as_ref(), &out.table)
            .await
            .context("loading batch")?;
        Ok::<_, anyhow::Error>((out, report))
    }
    .instrument(span);

    // An expired timeout drops the open transaction, which rolls back. A
    // pipeline still running on the blocking pool finishes and is discarded.
    let (out, report) = match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), batch)
            .await
            .map_err(|_| anyhow!("batch timed out after {secs}s, nothing committed"))??,
        None => batch.await?,
    };

    print_stage_reports(&out.reports);
    print_load_report(&report);
    Ok(())
}

fn cmd_resolve(config: &Config, lat: f64, lon: f64) -> anyhow::Result<()> {
    let point = GeoPoint::new(lat, lon);
    if !point.is_valid() {
        return Err(anyhow!("coordinate out of range: {lat} {lon}"));
    }
    let (resolver, ids) = load_reference(config)?;
    let resolution = resolver.resolve_point(point);
    let region_id = ids.map_id(resolution.region, config.pipeline.fallback_region_id);

    println!();
    println!("  Point:   {point}");
    println!("  Region:  {}", resolution.region);
    println!(
        "  ID:      {region_id}{}",
        if ids.get(resolution.region).is_none() {
            " (fallback)"
        } else {
            ""
        }
    );
    println!("  Method:  {}", resolution.method);
    println!();
    Ok(())
}

async fn cmd_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await.context("reading statistics")?;
    let counts = store.region_counts().await.context("reading region counts")?;

    if json {
        let body = serde_json::json!({ "stats": stats, "regions": counts });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!();
    println!("Database: {}", config.database.url.as_deref().unwrap_or(&config.database.path));
    println!();
    println!("  Flights:  {}", stats.flights);
    println!("  Regions:  {}", stats.regions);
    if let (Some(first), Some(last)) = (&stats.first_flight_date, &stats.last_flight_date) {
        println!("  Dates:    {first} .. {last}");
    }
    println!();

    if counts.is_empty() {
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["ID", "Region", "Flights"]);
    for row in &counts {
        table.add_row(vec![
            Cell::new(row.region_id),
            Cell::new(&row.name),
            Cell::new(row.flights),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        let path = config::save_config(config)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    print!("{}", config::serialize_config(config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_stage_reports(reports: &[StageReport]) {
    let mut table = Table::new();
    table.set_header(vec!["Stage", "In", "Out", "Skipped", "Counters"]);
    for report in reports {
        let counters = report
            .counters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        table.add_row(vec![
            Cell::new(report.stage),
            Cell::new(report.rows_in),
            Cell::new(report.rows_out),
            Cell::new(report.skipped.len()),
            Cell::new(counters),
        ]);
    }
    println!();
    println!("{table}");

    for report in reports {
        for (name, rows) in &report.unmapped {
            println!("  unmapped region: {name} ({rows} rows)");
        }
    }
}

fn print_load_report(report: &LoadReport) {
    println!();
    println!("Load complete: {} rows", report.rows);
    println!("  Committed:        {}", report.committed);
    println!("  Duplicates:       {}", report.duplicates);
    println!("  No flight id:     {}", report.missing_flight_id);
    println!("  Regions created:  {}", report.regions_created);
    if report.region_conflicts > 0 {
        println!("  Region conflicts: {}", report.region_conflicts);
    }
    if report.unparsed_cells > 0 {
        println!("  Unparsed cells:   {}", report.unparsed_cells);
    }
    if !report.skipped.is_empty() {
        println!("  Skipped rows:     {}", report.skipped.len());
        for skip in report.skipped.iter().take(10) {
            println!("    line {}: {}", skip.line, skip.reason);
        }
    }
    println!();
}
