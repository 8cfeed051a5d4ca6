//! Field extraction from flight-plan message text.
//!
//! A source row carries up to three free-text messages: the flight plan
//! itself, a departure notice and an arrival notice. Each field is located by
//! its label with a fixed fallback order; a field that cannot be found is
//! `None`, never an error.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use crate::duration::parse_clock;
use crate::record::{ExtractedFlightRecord, RawFlightMessage};
use crate::types::{GeoPoint, UNKNOWN_AIRCRAFT_TYPE};

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Extended `DDMMSS[NS]DDDMMSS[EW]` is tried before compact `DDMM[NS]DDDMM[EW]`
/// at each position, so a scan yields tokens in order of appearance.
static COORDINATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<xlatd>\d{2})(?P<xlatm>\d{2})(?P<xlats>\d{2})(?P<xns>[NS])(?P<xlond>\d{3})(?P<xlonm>\d{2})(?P<xlons>\d{2})(?P<xew>[EW])|(?P<latd>\d{2})(?P<latm>\d{2})(?P<ns>[NS])(?P<lond>\d{3})(?P<lonm>\d{2})(?P<ew>[EW])",
    )
    .unwrap()
});

/// Flight identifier labels in priority order.
static FLIGHT_ID: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"SID/(\d+)").unwrap(),
        Regex::new(r"-SID (\d+)").unwrap(),
        Regex::new(r"REG/([A-Z0-9,]+)").unwrap(),
        Regex::new(r"-REG ([A-Z0-9,]+)").unwrap(),
    ]
});

static AIRCRAFT_TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"TYP/([A-Z0-9]+)").unwrap());

static DEP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"DEP/(\S+)").unwrap());
static DEST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"DEST/(\S+)").unwrap());
static ADEPZ: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ADEPZ ([^\n]+)").unwrap());
static ADARRZ: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ADARRZ ([^\n]+)").unwrap());
static REMARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)RMK/(.+?)(?:SID/|$)").unwrap());

static ZZZZ_TIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ZZZZ(\d{4})").unwrap());
static ATD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ATD (\d{4})").unwrap());
static ATA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-ATA (\d{4})").unwrap());

/// Every label the field rules read, or that frames a message.
static MESSAGE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-TITLE|\((?:FPL|SHR)|SID/|-SID |REG/|-REG |TYP/|DEP/|DEST/|DOF/|ADD \d{6}|-ZZZZ\d|RMK/|-ADEPZ|-ADARRZ|-ATD |-ATA ")
        .unwrap()
});

static DOF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"DOF/(\d{6})").unwrap());
static ADD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ADD (\d{6})").unwrap());

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract every field of one source row.
pub fn extract(region: &str, primary: &str, departure: &str, arrival: &str) -> ExtractedFlightRecord {
    let mut record = ExtractedFlightRecord::empty(region);

    let all = format!("{primary} {departure} {arrival}");
    record.flight_id = flight_id(&all);
    record.aircraft_type = aircraft_type(primary);
    record.flight_date = flight_date(primary).or_else(|| flight_date(departure));

    let (dep, arr) = coordinates(primary, departure, arrival);
    record.departure = dep;
    record.arrival = arr;
    record.apply_symmetry();

    let (dep_time, arr_time) = times(primary, departure, arrival);
    record.departure_time = dep_time;
    record.arrival_time = arr_time;

    record
}

pub fn extract_message(msg: &RawFlightMessage) -> ExtractedFlightRecord {
    extract(&msg.region, &msg.primary, &msg.departure, &msg.arrival)
}

/// True when `text` carries a field label or a coordinate token.
pub fn looks_like_message(text: &str) -> bool {
    MESSAGE_LABEL.is_match(text) || COORDINATE.is_match(text)
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

pub fn flight_id(text: &str) -> Option<String> {
    FLIGHT_ID
        .iter()
        .find_map(|re| re.captures(text).map(|c| c[1].to_string()))
}

pub fn aircraft_type(text: &str) -> String {
    AIRCRAFT_TYPE
        .captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| UNKNOWN_AIRCRAFT_TYPE.to_string())
}

/// `DOF/YYMMDD` or `ADD YYMMDD`. Impossible calendar dates are `None`.
pub fn flight_date(text: &str) -> Option<NaiveDate> {
    let caps = DOF.captures(text).or_else(|| ADD.captures(text))?;
    NaiveDate::parse_from_str(&caps[1], "%y%m%d").ok()
}

/// Departure and arrival coordinates, before the symmetry rule.
fn coordinates(primary: &str, departure: &str, arrival: &str) -> (Option<GeoPoint>, Option<GeoPoint>) {
    let mut dep = DEP
        .captures(primary)
        .and_then(|c| parse_coordinate(&c[1]))
        .or_else(|| ADEPZ.captures(departure).and_then(|c| parse_coordinate(&c[1])));
    let mut arr = DEST
        .captures(primary)
        .and_then(|c| parse_coordinate(&c[1]))
        .or_else(|| ADARRZ.captures(arrival).and_then(|c| parse_coordinate(&c[1])));

    if dep.is_none() || arr.is_none() {
        let mut found = REMARKS
            .captures(primary)
            .map(|c| scan_coordinates(&c[1]))
            .unwrap_or_default();
        if found.is_empty() {
            found = scan_coordinates(primary);
        }
        if let (Some(first), Some(last)) = (found.first(), found.last()) {
            dep = dep.or(Some(*first));
            arr = arr.or(Some(*last));
        }
    }
    (dep, arr)
}

/// `-ZZZZ` times first; `-ATD`/`-ATA` fill whatever is still missing.
fn times(primary: &str, departure: &str, arrival: &str) -> (Option<String>, Option<String>) {
    let zzzz: Vec<&str> = ZZZZ_TIME
        .captures_iter(primary)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let mut dep = zzzz.first().and_then(|t| clock_time(t));
    let mut arr = if zzzz.len() >= 2 {
        zzzz.last().and_then(|t| clock_time(t))
    } else {
        None
    };

    if dep.is_none() {
        dep = ATD.captures(departure).and_then(|c| clock_time(&c[1]));
    }
    if arr.is_none() {
        arr = ATA.captures(arrival).and_then(|c| clock_time(&c[1]));
    }
    (dep, arr)
}

/// `HHMM` → `HH:MM`, rejecting impossible clock readings.
fn clock_time(digits: &str) -> Option<String> {
    if digits.len() != 4 {
        return None;
    }
    let text = format!("{}:{}", &digits[..2], &digits[2..]);
    parse_clock(&text).map(|_| text)
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// First coordinate token in `text`, decoded.
pub fn parse_coordinate(text: &str) -> Option<GeoPoint> {
    COORDINATE.captures(text).and_then(|c| decode_coordinate(&c))
}

/// Every decodable coordinate token in order of appearance.
pub fn scan_coordinates(text: &str) -> Vec<GeoPoint> {
    COORDINATE
        .captures_iter(text)
        .filter_map(|c| decode_coordinate(&c))
        .collect()
}

fn decode_coordinate(caps: &Captures) -> Option<GeoPoint> {
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());
    let dir = |name: &str| caps.name(name).map(|m| m.as_str());

    let (lat, lon) = if caps.name("xns").is_some() {
        (
            angle(num("xlatd")?, num("xlatm")?, num("xlats")?, dir("xns")? == "S")?,
            angle(num("xlond")?, num("xlonm")?, num("xlons")?, dir("xew")? == "W")?,
        )
    } else {
        (
            angle(num("latd")?, num("latm")?, 0.0, dir("ns")? == "S")?,
            angle(num("lond")?, num("lonm")?, 0.0, dir("ew")? == "W")?,
        )
    };

    let point = GeoPoint::rounded(lat, lon);
    point.is_valid().then_some(point)
}

fn angle(degrees: f64, minutes: f64, seconds: f64, negative: bool) -> Option<f64> {
    if minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    Some(if negative { -value } else { value })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "-TITLE IDEP\n(SHR-ZZZZZ\n-ZZZZ0900\n-M0000/M0005 /ZONA R0,5 5530N03730E/\n-ZZZZ1015\n-DEP/5530N03730E DEST/5545N03745E DOF/250115 OPR/TEST REG/RA0001 TYP/BLA RMK/MONITORING SID/12345)";

    #[test]
    fn test_looks_like_message() {
        assert!(looks_like_message(SCENARIO));
        assert!(looks_like_message("REG/RA0001 TYP/BLA 5630N03500E"));
        assert!(looks_like_message("-ADARRZ 5545N03745E"));
        assert!(looks_like_message("-ATA 1015"));
        assert!(looks_like_message("5530N03730E"));
        assert!(!looks_like_message("Центр ЕС ОрВД"));
        assert!(!looks_like_message("SHR"));
        assert!(!looks_like_message("DEP"));
        assert!(!looks_like_message("Тверская область"));
    }

    #[test]
    fn test_scenario_row() {
        let rec = extract("Московская область", SCENARIO, "", "");
        assert_eq!(rec.flight_id.as_deref(), Some("12345"));
        assert_eq!(rec.aircraft_type, "BLA");
        assert_eq!(rec.departure.unwrap().to_string(), "55.50 37.50");
        assert_eq!(rec.arrival.unwrap().to_string(), "55.75 37.75");
        assert_eq!(rec.flight_date, NaiveDate::from_ymd_opt(2025, 1, 15));
        assert_eq!(rec.departure_time.as_deref(), Some("09:00"));
        assert_eq!(rec.arrival_time.as_deref(), Some("10:15"));
        assert_eq!(rec.region, "Московская область");
    }

    #[test]
    fn test_compact_coordinate() {
        assert_eq!(parse_coordinate("5530N03730E"), Some(GeoPoint::new(55.5, 37.5)));
        assert_eq!(parse_coordinate("5545N03745E"), Some(GeoPoint::new(55.75, 37.75)));
    }

    #[test]
    fn test_extended_coordinate_and_hemispheres() {
        assert_eq!(
            parse_coordinate("553000N0373000E"),
            Some(GeoPoint::new(55.5, 37.5))
        );
        // 33°52'00"S 151°12'36"W
        assert_eq!(
            parse_coordinate("335200S1511236W"),
            Some(GeoPoint::new(-33.87, -151.21))
        );
        assert_eq!(parse_coordinate("5530S03730W"), Some(GeoPoint::new(-55.5, -37.5)));
    }

    #[test]
    fn test_bad_coordinates() {
        assert_eq!(parse_coordinate("ZZZZ"), None);
        assert_eq!(parse_coordinate("5575N03730E"), None);
        assert_eq!(parse_coordinate("9530N03730E"), None);
        assert_eq!(parse_coordinate(""), None);
    }

    #[test]
    fn test_flight_id_priority() {
        assert_eq!(flight_id("REG/RA0001 SID/777").as_deref(), Some("777"));
        assert_eq!(flight_id("-SID 42 REG/X").as_deref(), Some("42"));
        assert_eq!(flight_id("REG/RA0001,RA0002").as_deref(), Some("RA0001,RA0002"));
        assert_eq!(flight_id("-REG 0K1234").as_deref(), Some("0K1234"));
        assert_eq!(flight_id("nothing here"), None);
    }

    #[test]
    fn test_aircraft_type_default() {
        assert_eq!(aircraft_type("TYP/SHAR"), "SHAR");
        assert_eq!(aircraft_type("no type"), UNKNOWN_AIRCRAFT_TYPE);
    }

    #[test]
    fn test_date_fallbacks() {
        let rec = extract("X", "no date", "-ADD 250201", "");
        assert_eq!(rec.flight_date, NaiveDate::from_ymd_opt(2025, 2, 1));
        assert_eq!(flight_date("DOF/251340"), None);
    }

    #[test]
    fn test_single_dep_label_is_symmetric() {
        let rec = extract("X", "DEP/5530N03730E", "", "");
        assert_eq!(rec.departure, rec.arrival);
        assert_eq!(rec.arrival, Some(GeoPoint::new(55.5, 37.5)));
    }

    #[test]
    fn test_notice_coordinates() {
        let rec = extract(
            "X",
            "DEP/ZZZZ DEST/ZZZZ",
            "-ADEPZ 5530N03730E\n-ATD 0830",
            "-ADARRZ 5600N03800E\n-ATA 0945",
        );
        assert_eq!(rec.departure, Some(GeoPoint::new(55.5, 37.5)));
        assert_eq!(rec.arrival, Some(GeoPoint::new(56.0, 38.0)));
        assert_eq!(rec.departure_time.as_deref(), Some("08:30"));
        assert_eq!(rec.arrival_time.as_deref(), Some("09:45"));
    }

    #[test]
    fn test_remarks_scan() {
        let text = "-ZZZZ0700 RMK/ROUTE 5530N03730E 5600N03800E 5630N03830E SID/9";
        let rec = extract("X", text, "", "");
        assert_eq!(rec.departure, Some(GeoPoint::new(55.5, 37.5)));
        assert_eq!(rec.arrival, Some(GeoPoint::new(56.5, 38.5)));
        assert_eq!(rec.departure_time.as_deref(), Some("07:00"));
        assert_eq!(rec.arrival_time, None);
    }

    #[test]
    fn test_whole_message_scan_without_remarks() {
        let rec = extract("X", "ZONA 5530N03730E/", "", "");
        assert_eq!(rec.departure, Some(GeoPoint::new(55.5, 37.5)));
        assert_eq!(rec.arrival, Some(GeoPoint::new(55.5, 37.5)));
    }

    #[test]
    fn test_nothing_found() {
        let rec = extract("Тверская область", "garbage", "", "");
        assert_eq!(rec.flight_id, None);
        assert_eq!(rec.departure, None);
        assert_eq!(rec.arrival, None);
        assert_eq!(rec.departure_time, None);
        assert_eq!(rec.flight_date, None);
    }
}
