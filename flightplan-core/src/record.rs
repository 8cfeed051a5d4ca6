//! Flight records at each step of the pipeline.
//!
//! `RawFlightMessage` is one source row, `ExtractedFlightRecord` is the output
//! of the field extractor, and `ResolvedFlightRecord` is a final-table row
//! parsed back into typed values for the loader.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::duration::{parse_clock, parse_duration_minutes};
use crate::table::columns;
use crate::types::{
    format_date, is_no_data, or_no_data, parse_date, GeoPoint, RowError, UNKNOWN_AIRCRAFT_TYPE,
};

/// One source row: a region label plus up to three message blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFlightMessage {
    /// Source line number (1-based).
    pub line: usize,
    pub region: String,
    /// Flight-plan message (FPL / SHR).
    pub primary: String,
    /// Departure notice (DEP).
    pub departure: String,
    /// Arrival notice (ARR).
    pub arrival: String,
}

// ---------------------------------------------------------------------------
// Extracted
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFlightRecord {
    pub flight_id: Option<String>,
    pub aircraft_type: String,
    pub departure: Option<GeoPoint>,
    pub arrival: Option<GeoPoint>,
    pub flight_date: Option<NaiveDate>,
    /// `HH:MM`, UTC.
    pub departure_time: Option<String>,
    /// `HH:MM`, UTC.
    pub arrival_time: Option<String>,
    pub region: String,
}

impl ExtractedFlightRecord {
    pub fn empty(region: &str) -> Self {
        ExtractedFlightRecord {
            flight_id: None,
            aircraft_type: UNKNOWN_AIRCRAFT_TYPE.to_string(),
            departure: None,
            arrival: None,
            flight_date: None,
            departure_time: None,
            arrival_time: None,
            region: region.to_string(),
        }
    }

    /// Single-point flights: copy whichever endpoint exists onto the other.
    pub fn apply_symmetry(&mut self) {
        match (self.departure, self.arrival) {
            (Some(dep), None) => self.arrival = Some(dep),
            (None, Some(arr)) => self.departure = Some(arr),
            _ => {}
        }
    }

    /// Cells in `columns::EXTRACTED` order.
    pub fn to_cells(&self) -> Vec<String> {
        vec![
            or_no_data(self.flight_id.as_deref()),
            self.aircraft_type.clone(),
            or_no_data(self.departure),
            or_no_data(self.arrival),
            or_no_data(self.flight_date.map(format_date)),
            or_no_data(self.departure_time.as_deref()),
            or_no_data(self.arrival_time.as_deref()),
            self.region.clone(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Resolved
// ---------------------------------------------------------------------------

/// A final-table row with every display string parsed back.
///
/// Unparsable cells become `None` and their column header is listed in
/// `unparsed`; only a bad `region_id` rejects the row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFlightRecord {
    pub flight_id: Option<String>,
    pub aircraft_type: Option<String>,
    pub departure: Option<GeoPoint>,
    pub arrival: Option<GeoPoint>,
    pub flight_date: Option<NaiveDate>,
    pub departure_time: Option<NaiveTime>,
    pub arrival_time: Option<NaiveTime>,
    pub duration_minutes: Option<i64>,
    pub region: String,
    pub region_id: i32,
    pub unparsed: Vec<&'static str>,
}

impl ResolvedFlightRecord {
    pub fn from_cells(cells: &[String]) -> Result<Self, RowError> {
        if cells.len() < columns::FINAL.len() {
            return Err(RowError::TooFewColumns {
                expected: columns::FINAL.len(),
                actual: cells.len(),
            });
        }

        let mut unparsed = Vec::new();
        let mut typed = |index: usize, parsed: Option<()>| {
            if parsed.is_none() && !is_no_data(&cells[index]) {
                unparsed.push(columns::FINAL[index]);
            }
        };

        let departure = GeoPoint::parse(&cells[columns::TAKEOFF_COORDS]);
        typed(columns::TAKEOFF_COORDS, departure.map(|_| ()));
        let arrival = GeoPoint::parse(&cells[columns::LANDING_COORDS]);
        typed(columns::LANDING_COORDS, arrival.map(|_| ()));
        let flight_date = parse_date(&cells[columns::FLIGHT_DATE]);
        typed(columns::FLIGHT_DATE, flight_date.map(|_| ()));
        let departure_time = clock(&cells[columns::TAKEOFF_TIME]);
        typed(columns::TAKEOFF_TIME, departure_time.map(|_| ()));
        let arrival_time = clock(&cells[columns::LANDING_TIME]);
        typed(columns::LANDING_TIME, arrival_time.map(|_| ()));
        let duration_minutes = parse_duration_minutes(&cells[columns::DURATION]);
        typed(columns::DURATION, duration_minutes.map(|_| ()));

        let id_cell = cells[columns::REGION_ID].trim();
        let region_id = id_cell
            .parse::<i32>()
            .map_err(|_| RowError::InvalidRegionId(id_cell.to_string()))?;

        Ok(ResolvedFlightRecord {
            flight_id: present(&cells[columns::FLIGHT_ID]),
            aircraft_type: present(&cells[columns::AIRCRAFT_TYPE]),
            departure,
            arrival,
            flight_date,
            departure_time,
            arrival_time,
            duration_minutes,
            region: cells[columns::REGION].trim().to_string(),
            region_id,
            unparsed,
        })
    }
}

fn present(cell: &str) -> Option<String> {
    (!is_no_data(cell)).then(|| cell.trim().to_string())
}

fn clock(cell: &str) -> Option<NaiveTime> {
    if is_no_data(cell) {
        return None;
    }
    parse_clock(cell).map(|(time, _)| time)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
