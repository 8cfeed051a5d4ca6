//! Shared types, error enum, sentinels and display-string helpers.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by flightplan-core.
#[derive(Debug, Error)]
pub enum FlightPlanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("invalid GeoJSON: {0}")]
    GeoJson(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("{path}: no row has more than one column; wrong delimiter?")]
    WrongDelimiter { path: String },
    #[error("{0}: no data rows")]
    EmptyInput(String),
}

pub type Result<T> = std::result::Result<T, FlightPlanError>;

/// Row-shape problems. Never fatal on their own: the row is skipped and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("expected at least {expected} columns, got {actual}")]
    TooFewColumns { expected: usize, actual: usize },
    #[error("invalid region id {0:?}")]
    InvalidRegionId(String),
}

// ---------------------------------------------------------------------------
// Sentinels
// ---------------------------------------------------------------------------

/// Absent-value marker used in every tabular intermediate.
pub const NO_DATA: &str = "Нет данных";

/// Aircraft type written when no `TYP/` field is present.
pub const UNKNOWN_AIRCRAFT_TYPE: &str = "Неизвестный";

/// Resolver output when the gazetteer holds no regions at all.
pub const REGION_NOT_FOUND: &str = "Регион не найден";

/// Region cell for rows whose takeoff coordinate could not be parsed.
pub const INVALID_COORDINATES: &str = "Неверные координаты";

/// Region name used for GeoJSON features without a usable name property.
pub const UNNAMED_REGION: &str = "Неизвестный регион";

/// True for every spelling of "no data" accepted from upstream tables.
pub fn is_no_data(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    matches!(
        text.to_lowercase().as_str(),
        "нет данных" | "нет_данных" | "null"
    )
}

/// Render an optional display value, substituting the no-data sentinel.
pub fn or_no_data<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NO_DATA.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Decimal-degree coordinate. Displays as `"lat lon"` with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint { lat, lon }
    }

    /// Build a point rounded to two decimal places on both axes.
    pub fn rounded(lat: f64, lon: f64) -> Self {
        GeoPoint {
            lat: round2(lat),
            lon: round2(lon),
        }
    }

    /// Parse a `"lat lon"` display string.
    ///
    /// Tolerates brackets and `,`/`;` separators. Returns `None` for the
    /// no-data sentinel, non-numeric parts, or out-of-range values.
    pub fn parse(text: &str) -> Option<Self> {
        if is_no_data(text) {
            return None;
        }
        let cleaned = text
            .trim()
            .trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']'))
            .replace([',', ';'], " ");
        let mut parts = cleaned.split_whitespace();
        let lat: f64 = parts.next()?.parse().ok()?;
        let lon: f64 = parts.next()?.parse().ok()?;
        let point = GeoPoint { lat, lon };
        point.is_valid().then_some(point)
    }

    /// Finite and within the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {:.2}", self.lat, self.lon)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

const DISPLAY_DATE_FORMAT: &str = "%d.%m.%y";

/// Format a flight date as `DD.MM.YY`.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DISPLAY_DATE_FORMAT).to_string()
}

/// Parse a `DD.MM.YY` display date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    if is_no_data(text) {
        return None;
    }
    NaiveDate::parse_from_str(text.trim(), DISPLAY_DATE_FORMAT).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
