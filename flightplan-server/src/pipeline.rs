//! Batch pipeline: raw source → extract → duration → resolve → region id.
//!
//! Each stage reads one complete table and returns a new one together with a
//! `StageReport`. Rows inside a stage are independent and run on the rayon
//! pool; the gazetteer behind the resolver is shared read-only.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use flightplan_core::columns;
use flightplan_core::extract::extract_message;
use flightplan_core::types::{is_no_data, FlightPlanError, GeoPoint, INVALID_COORDINATES, NO_DATA};
use flightplan_core::{flight_duration, RegionIdMap, RegionResolver, Row, Table};
use flightplan_feeder::{raw_messages, read_source};

const TAKEOFF_COORDS_HEADER: &str = columns::EXTRACTED[columns::TAKEOFF_COORDS];
const REGION_HEADER: &str = columns::EXTRACTED[columns::EXTRACTED_REGION];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] FlightPlanError),
    #[error("{stage} stage: input has no {column:?} column")]
    MissingColumn { stage: Stage, column: &'static str },
    #[error("cannot write {stage} intermediate to {path}: {source}")]
    Intermediate {
        stage: Stage,
        path: String,
        source: FlightPlanError,
    },
    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Extract,
    Duration,
    Resolve,
    RegionId,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Duration => "duration",
            Stage::Resolve => "resolve",
            Stage::RegionId => "region_id",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row dropped by a stage, with its source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub rows_in: usize,
    pub rows_out: usize,
    pub skipped: Vec<SkippedRow>,
    pub counters: BTreeMap<String, usize>,
    /// Region names that fell back to the default id, with their row counts.
    pub unmapped: BTreeMap<String, usize>,
}

impl StageReport {
    fn new(stage: Stage, rows_in: usize) -> Self {
        StageReport {
            stage,
            rows_in,
            rows_out: 0,
            skipped: Vec::new(),
            counters: BTreeMap::new(),
            unmapped: BTreeMap::new(),
        }
    }

    fn count(&mut self, key: &str) {
        *self.counters.entry(key.to_string()).or_default() += 1;
    }

    pub fn counter(&self, key: &str) -> usize {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Final table plus one report per stage, in stage order.
#[derive(Debug)]
pub struct PipelineOutput {
    pub table: Table,
    pub reports: Vec<StageReport>,
}

impl PipelineOutput {
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }
}

/// Per-row outcome inside a stage: the new row, or why it was dropped, plus
/// the counter keys it touched.
struct RowOutcome {
    row: Result<Row, SkippedRow>,
    tags: Vec<String>,
    /// Region name that had no id and took the fallback.
    unmapped: Option<String>,
}

impl RowOutcome {
    fn kept(row: Row) -> Self {
        RowOutcome {
            row: Ok(row),
            tags: Vec::new(),
            unmapped: None,
        }
    }

    fn skipped(line: usize, reason: impl Into<String>) -> Self {
        RowOutcome {
            row: Err(SkippedRow {
                line,
                reason: reason.into(),
            }),
            tags: Vec::new(),
            unmapped: None,
        }
    }

    fn tag(mut self, key: &str) -> Self {
        self.tags.push(key.to_string());
        self
    }

    fn unmapped(mut self, name: &str) -> Self {
        self.unmapped = Some(name.to_string());
        self
    }
}

fn collect(stage: Stage, header: Vec<String>, rows_in: usize, outcomes: Vec<RowOutcome>) -> (Table, StageReport) {
    let mut report = StageReport::new(stage, rows_in);
    let mut table = Table {
        header,
        header_line: None,
        rows: Vec::with_capacity(outcomes.len()),
    };
    for outcome in outcomes {
        for tag in &outcome.tags {
            report.count(tag);
        }
        if let Some(name) = outcome.unmapped {
            *report.unmapped.entry(name).or_default() += 1;
        }
        match outcome.row {
            Ok(row) => table.rows.push(row),
            Err(skip) => report.skipped.push(skip),
        }
    }
    report.rows_out = table.len();
    (table, report)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Raw `region; flight plan; departure; arrival` rows → extracted fields.
pub fn extract_stage(raw: &Table) -> (Table, StageReport) {
    let msgs = raw_messages(raw);

    let outcomes: Vec<RowOutcome> = msgs
        .messages
        .par_iter()
        .map(|msg| {
            let record = extract_message(msg);
            let mut outcome = RowOutcome::kept(Row::new(msg.line, record.to_cells()));
            if record.flight_id.is_none() {
                outcome = outcome.tag("no_flight_id");
            }
            if record.departure.is_none() {
                outcome = outcome.tag("no_coordinates");
            }
            if record.flight_date.is_none() {
                outcome = outcome.tag("no_date");
            }
            if record.departure_time.is_none() {
                outcome = outcome.tag("no_takeoff_time");
            }
            outcome
        })
        .collect();

    let header = columns::EXTRACTED.iter().map(|h| h.to_string()).collect();
    let (table, mut report) = collect(Stage::Extract, header, raw.len(), outcomes);
    report.skipped.extend(
        msgs.skipped
            .into_iter()
            .map(|(line, reason)| SkippedRow { line, reason }),
    );
    report.skipped.sort_by_key(|s| s.line);
    if let Some(line) = msgs.header_line {
        report.count("header_row");
        debug!(line, "first row taken as header");
    }
    (table, report)
}

/// Insert the flight duration before the region column.
pub fn duration_stage(table: &Table) -> (Table, StageReport) {
    let width = columns::EXTRACTED.len();

    let outcomes: Vec<RowOutcome> = table
        .rows
        .par_iter()
        .map(|row| {
            if row.cells.len() < width {
                return RowOutcome::skipped(
                    row.line,
                    format!("expected at least {width} columns, got {}", row.cells.len()),
                );
            }
            let duration = flight_duration(row.cell(columns::TAKEOFF_TIME), row.cell(columns::LANDING_TIME));
            let missing = duration.is_none();
            let mut cells = row.cells.clone();
            cells.insert(columns::DURATION, duration.unwrap_or_else(|| NO_DATA.to_string()));
            let outcome = RowOutcome::kept(Row::new(row.line, cells));
            if missing {
                outcome.tag("no_duration")
            } else {
                outcome
            }
        })
        .collect();

    let mut header = if table.header.len() >= width {
        table.header.clone()
    } else {
        columns::EXTRACTED.iter().map(|h| h.to_string()).collect()
    };
    header.insert(columns::DURATION, columns::DURATION_HEADER.to_string());
    collect(Stage::Duration, header, table.len(), outcomes)
}

/// Overwrite the region column with the region containing the takeoff point.
///
/// Columns are located by header. A missing or unparsable takeoff coordinate
/// sets the region cell to the invalid-coordinates sentinel.
pub fn resolve_stage(resolver: &RegionResolver, table: &Table) -> Result<(Table, StageReport), PipelineError> {
    let region_idx = header_index(table, REGION_HEADER, Stage::Resolve)?;
    let coords_idx = header_index(table, TAKEOFF_COORDS_HEADER, Stage::Resolve)?;
    let needed = region_idx.max(coords_idx) + 1;

    let outcomes: Vec<RowOutcome> = table
        .rows
        .par_iter()
        .map(|row| {
            if row.cells.len() < needed {
                return RowOutcome::skipped(
                    row.line,
                    format!("expected at least {needed} columns, got {}", row.cells.len()),
                );
            }
            let mut cells = row.cells.clone();
            match GeoPoint::parse(&cells[coords_idx]) {
                Some(point) => {
                    let resolution = resolver.resolve_point(point);
                    cells[region_idx] = resolution.region.to_string();
                    RowOutcome::kept(Row::new(row.line, cells)).tag(resolution.method.as_str())
                }
                None => {
                    cells[region_idx] = INVALID_COORDINATES.to_string();
                    RowOutcome::kept(Row::new(row.line, cells)).tag("invalid_coordinates")
                }
            }
        })
        .collect();

    Ok(collect(Stage::Resolve, table.header.clone(), table.len(), outcomes))
}

/// Append the numeric region id. Unknown names get `fallback`.
pub fn region_id_stage(ids: &RegionIdMap, fallback: i32, table: &Table) -> Result<(Table, StageReport), PipelineError> {
    let region_idx = header_index(table, REGION_HEADER, Stage::RegionId)?;

    let outcomes: Vec<RowOutcome> = table
        .rows
        .par_iter()
        .map(|row| {
            if row.cells.len() <= region_idx || is_no_data(row.cell(region_idx)) {
                return RowOutcome::skipped(row.line, "no region name");
            }
            let name = row.cell(region_idx).trim();
            let mut cells = row.cells.clone();
            match ids.get(name) {
                Some(id) => {
                    cells.push(id.to_string());
                    RowOutcome::kept(Row::new(row.line, cells)).tag("mapped")
                }
                None => {
                    cells.push(fallback.to_string());
                    RowOutcome::kept(Row::new(row.line, cells))
                        .tag("fallback")
                        .unmapped(name)
                }
            }
        })
        .collect();

    let mut header = table.header.clone();
    header.push(columns::REGION_ID_HEADER.to_string());
    Ok(collect(Stage::RegionId, header, table.len(), outcomes))
}

fn header_index(table: &Table, column: &'static str, stage: Stage) -> Result<usize, PipelineError> {
    table
        .header
        .iter()
        .position(|h| h.trim() == column)
        .ok_or(PipelineError::MissingColumn { stage, column })
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Pipeline {
    resolver: RegionResolver,
    ids: RegionIdMap,
    fallback_region_id: i32,
    keep_intermediates: Option<PathBuf>,
    threads: usize,
}

impl Pipeline {
    pub fn new(resolver: RegionResolver, ids: RegionIdMap) -> Self {
        Pipeline {
            resolver,
            ids,
            fallback_region_id: flightplan_core::DEFAULT_FALLBACK_REGION_ID,
            keep_intermediates: None,
            threads: 0,
        }
    }

    pub fn fallback_region_id(mut self, id: i32) -> Self {
        self.fallback_region_id = id;
        self
    }

    /// Write every stage's table into `dir` as `NN-<stage>.csv`.
    pub fn keep_intermediates(mut self, dir: Option<PathBuf>) -> Self {
        self.keep_intermediates = dir;
        self
    }

    /// Worker threads for row-parallel stages; 0 uses the global pool.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn resolver(&self) -> &RegionResolver {
        &self.resolver
    }

    /// Read a source file and run every stage over it.
    pub fn run(&self, input: &Path) -> Result<PipelineOutput, PipelineError> {
        let raw = read_source(input)?;
        info!(rows = raw.len(), "read {}", input.display());
        self.run_table(&raw)
    }

    /// Run every stage over an already-read raw table.
    pub fn run_table(&self, raw: &Table) -> Result<PipelineOutput, PipelineError> {
        if self.threads == 0 {
            return self.stages(raw);
        }
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        pool.install(|| self.stages(raw))
    }

    fn stages(&self, raw: &Table) -> Result<PipelineOutput, PipelineError> {
        let mut reports = Vec::with_capacity(4);

        let (extracted, report) = extract_stage(raw);
        self.finish_stage(&extracted, report, &mut reports)?;

        let (timed, report) = duration_stage(&extracted);
        drop(extracted);
        self.finish_stage(&timed, report, &mut reports)?;

        let (resolved, report) = resolve_stage(&self.resolver, &timed)?;
        drop(timed);
        self.finish_stage(&resolved, report, &mut reports)?;

        let (table, report) = region_id_stage(&self.ids, self.fallback_region_id, &resolved)?;
        drop(resolved);
        self.finish_stage(&table, report, &mut reports)?;

        Ok(PipelineOutput { table, reports })
    }

    fn finish_stage(
        &self,
        table: &Table,
        report: StageReport,
        reports: &mut Vec<StageReport>,
    ) -> Result<(), PipelineError> {
        info!(
            stage = %report.stage,
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            skipped = report.skipped.len(),
            "stage complete"
        );
        for skip in &report.skipped {
            debug!(stage = %report.stage, line = skip.line, "skipped row: {}", skip.reason);
        }
        for (name, rows) in &report.unmapped {
            warn!(
                region = %name,
                rows,
                fallback = self.fallback_region_id,
                "region name has no id, using fallback"
            );
        }

        if let Some(dir) = &self.keep_intermediates {
            let path = dir.join(format!("{:02}-{}.csv", reports.len() + 1, report.stage));
            table
                .write_csv_path(&path)
                .map_err(|source| PipelineError::Intermediate {
                    stage: report.stage,
                    path: path.display().to_string(),
                    source,
                })?;
            debug!(stage = %report.stage, "wrote {}", path.display());
        }

        reports.push(report);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flightplan_core::Gazetteer;

    const FIXTURE: &str = include_str!("../../flightplan-core/testdata/regions.geo.json");

    const SCENARIO: &str = "-TITLE IDEP\n(SHR-ZZZZZ\n-ZZZZ0900\n-M0000/M0005 /ZONA R0,5 5530N03730E/\n-ZZZZ1015\n-DEP/5530N03730E DEST/5545N03745E DOF/250115 OPR/TEST REG/RA0001 TYP/BLA RMK/MONITORING SID/12345)";

    fn pipeline() -> Pipeline {
        let gazetteer = Arc::new(Gazetteer::from_geojson_str(FIXTURE).unwrap());
        let ids = RegionIdMap::from_geojson_str(FIXTURE).unwrap();
        Pipeline::new(RegionResolver::new(gazetteer), ids)
    }

    fn raw(rows: &[&[&str]]) -> Table {
        let mut table = Table::default();
        for (i, cells) in rows.iter().enumerate() {
            table.push(i + 1, cells.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    #[test]
    fn test_scenario_end_to_end() {
        let out = pipeline()
            .run_table(&raw(&[&["Московская область", SCENARIO, "", ""]]))
            .unwrap();

        assert_eq!(out.table.header, columns::FINAL.to_vec());
        assert_eq!(out.table.len(), 1);
        let cells = &out.table.rows[0].cells;
        assert_eq!(cells[columns::FLIGHT_ID], "12345");
        assert_eq!(cells[columns::AIRCRAFT_TYPE], "BLA");
        assert_eq!(cells[columns::TAKEOFF_COORDS], "55.50 37.50");
        assert_eq!(cells[columns::LANDING_COORDS], "55.75 37.75");
        assert_eq!(cells[columns::FLIGHT_DATE], "15.01.25");
        assert_eq!(cells[columns::TAKEOFF_TIME], "09:00");
        assert_eq!(cells[columns::LANDING_TIME], "10:15");
        assert_eq!(cells[columns::DURATION], "01:15");
        assert_eq!(cells[columns::REGION], "Москва");
        assert_eq!(cells[columns::REGION_ID], "77");

        assert_eq!(out.reports.len(), 4);
        let resolve = out.report(Stage::Resolve).unwrap();
        assert_eq!(resolve.counter("exact"), 1);
    }

    #[test]
    fn test_invalid_coordinates_fall_back() {
        let out = pipeline()
            .run_table(&raw(&[&["Тверская область", "(SHR-ZZZZZ -ZZZZ0900 SID/777)", "", ""]]))
            .unwrap();
        let cells = &out.table.rows[0].cells;
        assert_eq!(cells[columns::TAKEOFF_COORDS], NO_DATA);
        assert_eq!(cells[columns::DURATION], NO_DATA);
        assert_eq!(cells[columns::REGION], INVALID_COORDINATES);
        assert_eq!(cells[columns::REGION_ID], "91");

        let resolve = out.report(Stage::Resolve).unwrap();
        assert_eq!(resolve.counter("invalid_coordinates"), 1);
        let ids = out.report(Stage::RegionId).unwrap();
        assert_eq!(ids.counter("fallback"), 1);
        assert_eq!(ids.unmapped.get(INVALID_COORDINATES), Some(&1));
        assert_eq!(ids.counters.len(), 1);
    }

    #[test]
    fn test_short_rows_are_reported() {
        let out = pipeline()
            .run_table(&raw(&[
                &["Только регион"],
                &["Московская область", SCENARIO],
                &["", SCENARIO],
            ]))
            .unwrap();
        assert_eq!(out.table.len(), 1);
        assert_eq!(out.table.rows[0].line, 2);
        let extract = out.report(Stage::Extract).unwrap();
        assert_eq!(extract.rows_in, 3);
        assert_eq!(extract.rows_out, 1);
        assert_eq!(extract.skipped.iter().map(|s| s.line).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_consumed_header_is_counted() {
        let mut table = raw(&[&["Московская область", SCENARIO]]);
        table.header = vec!["Регион".into(), "SHR".into()];
        table.header_line = Some(1);
        for row in &mut table.rows {
            row.line += 1;
        }
        let (_, report) = extract_stage(&table);
        assert_eq!(report.counter("header_row"), 1);
        assert_eq!(report.rows_out, 1);

        let (_, report) = extract_stage(&raw(&[&["Московская область", SCENARIO]]));
        assert_eq!(report.counter("header_row"), 0);
    }

    #[test]
    fn test_resolve_stage_requires_columns() {
        let table = Table::new(&["a", "b"]);
        let err = resolve_stage(pipeline().resolver(), &table).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { stage: Stage::Resolve, .. }));
    }

    #[test]
    fn test_duration_stage_skips_short_rows() {
        let mut table = Table::new(&columns::EXTRACTED);
        table.push(4, vec!["1".into(), "BLA".into()]);
        let (out, report) = duration_stage(&table);
        assert!(out.is_empty());
        assert_eq!(report.skipped[0].line, 4);
        assert_eq!(out.header[columns::DURATION], columns::DURATION_HEADER);
    }

    #[test]
    fn test_intermediates_and_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("batch.csv");
        std::fs::write(&input, format!("Регион;SHR\nМосковская область;\"{SCENARIO}\"\n")).unwrap();
        let dumps = dir.path().join("stages");

        let out = pipeline()
            .keep_intermediates(Some(dumps.clone()))
            .threads(2)
            .run(&input)
            .unwrap();
        assert_eq!(out.table.len(), 1);
        for name in ["01-extract.csv", "02-duration.csv", "03-resolve.csv", "04-region_id.csv"] {
            assert!(dumps.join(name).exists(), "{name} missing");
        }

        let back = Table::read_csv_path(&dumps.join("04-region_id.csv")).unwrap();
        assert_eq!(back.header, columns::FINAL.to_vec());
        assert_eq!(back.rows[0].cells, out.table.rows[0].cells);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline().run(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Source(FlightPlanError::Io(_))));
    }
}
