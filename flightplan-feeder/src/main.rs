//! flightplan-feeder: source conversion and inspection.
//!
//! Supports:
//! - Converting a spreadsheet export into `;`-delimited CSV
//! - Previewing the fields extracted from each row of a source file

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flightplan_core::extract::extract_message;
use flightplan_core::table::columns;
use flightplan_core::types::Result;
use flightplan_feeder::{raw_messages, read_source, write_semicolon_csv};

#[derive(Parser)]
#[command(
    name = "flightplan-feeder",
    version,
    about = "Flight-plan export conversion and preview"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a spreadsheet or CSV export into `;`-delimited CSV
    Convert {
        /// Source file (.xlsx, .xls, .ods, .csv, ...)
        input: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the fields extracted from each row
    Preview {
        /// Source file (.xlsx, .xls, .ods, .csv, ...)
        input: PathBuf,

        /// Maximum rows to print
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert { input, output } => cmd_convert(&input, &output),
        Commands::Preview { input, limit } => cmd_preview(&input, limit),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_convert(input: &Path, output: &Path) -> Result<()> {
    let table = read_source(input)?;
    write_semicolon_csv(&table, output)?;
    info!(
        rows = table.len(),
        header = !table.header.is_empty(),
        "converted {} -> {}",
        input.display(),
        output.display()
    );
    Ok(())
}

fn cmd_preview(input: &Path, limit: usize) -> Result<()> {
    let table = read_source(input)?;
    let msgs = raw_messages(&table);
    for (line, reason) in &msgs.skipped {
        warn!(line, "skipped row: {reason}");
    }
    if let Some(line) = msgs.header_line {
        info!(line, header = ?table.header, "first row taken as header");
    }

    println!("{}", columns::EXTRACTED.join(" | "));
    for msg in msgs.messages.iter().take(limit) {
        let record = extract_message(msg);
        println!("{:>5}: {}", msg.line, record.to_cells().join(" | "));
    }

    eprintln!(
        "\n{} rows, {} messages, {} skipped",
        table.len(),
        msgs.messages.len(),
        msgs.skipped.len()
    );
    Ok(())
}
