//! Raw source readers for flight-plan exports.
//!
//! Input modes:
//! - Spreadsheets (`xlsx`, `xlsm`, `xls`, `xlsb`, `ods`): first sheet via calamine
//! - Delimited text (`csv`, `txt`): `;` as exported, `,` accepted
//!
//! Either way the result is a `Table` whose rows are `region; flight plan;
//! departure notice; arrival notice`.

use std::fs;
use std::io::Write;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use flightplan_core::extract::looks_like_message;
use flightplan_core::record::RawFlightMessage;
use flightplan_core::table::{read_delimited, Row, Table};
use flightplan_core::types::{FlightPlanError, Result};

const REGION: usize = 0;
const PRIMARY: usize = 1;
const DEPARTURE: usize = 2;
const ARRIVAL: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Spreadsheet,
    Delimited,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SourceFormat::Spreadsheet),
            "csv" | "txt" => Ok(SourceFormat::Delimited),
            _ => Err(FlightPlanError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read a raw source into a table, moving a detected header row out of the
/// data rows. The first row is a header only when no cell carries message
/// content; its line is kept in `header_line`.
pub fn read_source(path: &Path) -> Result<Table> {
    let mut table = match SourceFormat::from_path(path)? {
        SourceFormat::Spreadsheet => read_spreadsheet(path)?,
        SourceFormat::Delimited => read_text(path)?,
    };
    if table.rows.is_empty() {
        return Err(FlightPlanError::EmptyInput(path.display().to_string()));
    }
    if looks_like_header(&table.rows[0]) {
        let header = table.rows.remove(0);
        table.header = header.cells;
        table.header_line = Some(header.line);
    }
    Ok(table)
}

fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path).map_err(|e| FlightPlanError::Spreadsheet(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet) = sheet_names.first() else {
        return Err(FlightPlanError::Spreadsheet(format!(
            "{}: workbook has no sheets",
            path.display()
        )));
    };
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| FlightPlanError::Spreadsheet(e.to_string()))?;

    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let mut table = Table::default();
    for (i, row) in range.rows().enumerate() {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        table.push(first_row + i + 1, cells);
    }
    Ok(table)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => clean(s),
        other => other.to_string(),
    }
}

/// Semicolon first; comma when no row splits on semicolons.
fn read_text(path: &Path) -> Result<Table> {
    let bytes = fs::read(path)?;
    for delimiter in [b';', b','] {
        let mut table = read_delimited(bytes.as_slice(), delimiter, false)?;
        table.rows.retain(|row| row.cells.iter().any(|c| !c.trim().is_empty()));
        if table.rows.iter().any(|row| row.cells.len() > 1) {
            for row in &mut table.rows {
                for cell in &mut row.cells {
                    *cell = clean(cell);
                }
            }
            return Ok(table);
        }
        if table.rows.is_empty() {
            return Ok(table);
        }
    }
    Err(FlightPlanError::WrongDelimiter {
        path: path.display().to_string(),
    })
}

fn clean(text: &str) -> String {
    text.trim().trim_matches('"').trim().to_string()
}

fn looks_like_header(row: &Row) -> bool {
    !row.cells.iter().any(|c| looks_like_message(c))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Rows turned into messages, plus rows that could not be.
#[derive(Debug, Default)]
pub struct RawMessages {
    pub messages: Vec<RawFlightMessage>,
    /// Line of the header row the reader consumed, if any.
    pub header_line: Option<usize>,
    /// `(line, reason)` for every dropped row.
    pub skipped: Vec<(usize, String)>,
}

/// Rows with fewer than two columns, or an empty region or flight plan, are
/// skipped.
pub fn raw_messages(table: &Table) -> RawMessages {
    let mut out = RawMessages {
        header_line: table.header_line,
        ..RawMessages::default()
    };
    for row in &table.rows {
        if row.cells.len() < 2 {
            out.skipped
                .push((row.line, format!("expected at least 2 columns, got {}", row.cells.len())));
            continue;
        }
        let region = row.cell(REGION).trim();
        let primary = row.cell(PRIMARY).trim();
        if region.is_empty() || primary.is_empty() {
            out.skipped.push((row.line, "empty region or flight plan".into()));
            continue;
        }
        out.messages.push(RawFlightMessage {
            line: row.line,
            region: region.to_string(),
            primary: primary.to_string(),
            departure: row.cell(DEPARTURE).trim().to_string(),
            arrival: row.cell(ARRIVAL).trim().to_string(),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Write a raw table as `;`-delimited UTF-8 with BOM, the layout the
/// pipeline reads back.
pub fn write_semicolon_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = fs::File::create(path)?;
    file.write_all("\u{feff}".as_bytes())?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_writer(file);
    if !table.header.is_empty() {
        writer.write_record(&table.header)?;
    }
    for row in &table.rows {
        writer.write_record(&row.cells)?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
