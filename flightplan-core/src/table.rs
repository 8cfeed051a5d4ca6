//! Tabular intermediate passed between pipeline stages.
//!
//! Every stage consumes one complete `Table` and produces a new one. Cells are
//! display strings; absent values use the no-data sentinel. Each row keeps the
//! line number it had in the source file so skipped rows can be reported.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::types::Result;

/// Column positions and headers of the intermediate tables.
pub mod columns {
    pub const FLIGHT_ID: usize = 0;
    pub const AIRCRAFT_TYPE: usize = 1;
    pub const TAKEOFF_COORDS: usize = 2;
    pub const LANDING_COORDS: usize = 3;
    pub const FLIGHT_DATE: usize = 4;
    pub const TAKEOFF_TIME: usize = 5;
    pub const LANDING_TIME: usize = 6;
    /// Inserted by the duration stage; the region moves from 7 to 8.
    pub const DURATION: usize = 7;
    pub const REGION: usize = 8;
    pub const REGION_ID: usize = 9;

    /// Region column before the duration stage runs.
    pub const EXTRACTED_REGION: usize = 7;

    pub const FLIGHT_ID_HEADER: &str = "ID полета";
    pub const DURATION_HEADER: &str = "Время полета";
    pub const REGION_ID_HEADER: &str = "region_id";

    /// Output of the field extractor.
    pub const EXTRACTED: [&str; 8] = [
        FLIGHT_ID_HEADER,
        "Тип БПЛА",
        "Координаты взлета",
        "Координаты посадки",
        "Дата (DD.MM.YY)",
        "Время взлета (UTC)",
        "Время посадки (UTC)",
        "Регион",
    ];

    /// Output of the region id mapper, consumed by the loader.
    pub const FINAL: [&str; 10] = [
        FLIGHT_ID_HEADER,
        "Тип БПЛА",
        "Координаты взлета",
        "Координаты посадки",
        "Дата (DD.MM.YY)",
        "Время взлета (UTC)",
        "Время посадки (UTC)",
        DURATION_HEADER,
        "Регион",
        REGION_ID_HEADER,
    ];
}

const UTF8_BOM: &str = "\u{feff}";

/// One table row with its source line number (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: usize,
    pub cells: Vec<String>,
}

impl Row {
    pub fn new(line: usize, cells: Vec<String>) -> Self {
        Row { line, cells }
    }

    /// Cell text, or `""` past the end of a short row.
    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }
}

/// Header plus rows, fully buffered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    /// Source line the header was taken from, when it came out of the data.
    pub header_line: Option<usize>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new<S: AsRef<str>>(header: &[S]) -> Self {
        Table {
            header: header.iter().map(|h| h.as_ref().to_string()).collect(),
            header_line: None,
            rows: Vec::new(),
        }
    }

    pub fn with_rows<S: AsRef<str>>(header: &[S], rows: Vec<Row>) -> Self {
        let mut table = Table::new(header);
        table.rows = rows;
        table
    }

    pub fn push(&mut self, line: usize, cells: Vec<String>) {
        self.rows.push(Row::new(line, cells));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read a comma-separated table whose first record is the header.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        read_delimited(reader, b',', true)
    }

    pub fn read_csv_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_csv(BufReader::new(file))
    }

    /// Read a comma-separated table as rows only; a header, if any, stays in
    /// `rows[0]` for the caller to recognise.
    pub fn read_csv_rows<R: Read>(reader: R) -> Result<Self> {
        read_delimited(reader, b',', false)
    }

    pub fn read_csv_rows_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_csv_rows(BufReader::new(file))
    }

    /// Write header and rows as comma-separated values.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        out.write_record(&self.header)?;
        for row in &self.rows {
            out.write_record(&row.cells)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write to a file with a UTF-8 BOM so spreadsheet tools pick the encoding.
    pub fn write_csv_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(UTF8_BOM.as_bytes())?;
        self.write_csv(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Read delimited text into a table.
///
/// With `has_header`, the first record becomes the header; otherwise the
/// header is left empty and every record is a row. A leading BOM is dropped.
pub fn read_delimited<R: Read>(reader: R, delimiter: u8, has_header: bool) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut table = Table::default();
    let mut first = true;
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let mut cells: Vec<String> = record.iter().map(str::to_string).collect();
        if first {
            if let Some(cell) = cells.first_mut() {
                if let Some(stripped) = cell.strip_prefix(UTF8_BOM) {
                    *cell = stripped.to_string();
                }
            }
        }
        if first && has_header {
            table.header = cells;
        } else {
            table.rows.push(Row::new(line, cells));
        }
        first = false;
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new(&columns::EXTRACTED);
        table.push(
            2,
            vec![
                "12345".into(),
                "BLA".into(),
                "55.50 37.50".into(),
                "55.75 37.75".into(),
                "15.01.25".into(),
                "09:00".into(),
                "10:15".into(),
                "Московская область".into(),
            ],
        );
        table
    }

    #[test]
    fn test_csv_write_then_read() {
        let table = sample();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();

        let parsed = Table::read_csv(buf.as_slice()).unwrap();
        assert_eq!(parsed.header, table.header);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].cells, table.rows[0].cells);
        assert_eq!(parsed.rows[0].line, 2);
    }

    #[test]
    fn test_bom_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        sample().write_csv_path(&path).unwrap();

        let parsed = Table::read_csv_path(&path).unwrap();
        assert_eq!(parsed.header[0], columns::FLIGHT_ID_HEADER);
    }

    #[test]
    fn test_rows_only_keeps_first_record() {
        let table = sample();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();

        let parsed = Table::read_csv_rows(buf.as_slice()).unwrap();
        assert!(parsed.header.is_empty());
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.rows[0].cell(0), columns::FLIGHT_ID_HEADER);
        assert_eq!(parsed.rows[1].cells, table.rows[0].cells);
    }

    #[test]
    fn test_semicolon_without_header() {
        let text = "Регион А;msg one\nРегион Б;msg two;dep\n";
        let table = read_delimited(text.as_bytes(), b';', false).unwrap();
        assert!(table.header.is_empty());
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].cell(2), "dep");
        assert_eq!(table.rows[1].cell(3), "");
        assert_eq!(table.rows[1].line, 2);
    }
}
