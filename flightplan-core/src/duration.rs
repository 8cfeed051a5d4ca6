//! Flight duration from departure/arrival wall-clock times.
//!
//! Times are `HH:MM`, UTC, with no date attached. A literal `24:00` means
//! midnight at the end of the day. Arrival earlier than departure is taken
//! as a midnight crossing. Durations of 24h or more wrap modulo one day.

use chrono::{Duration, NaiveTime};

use crate::types::is_no_data;

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Parse `HH:MM`. The bool is true for `24:00` (midnight of the next day).
pub fn parse_clock(text: &str) -> Option<(NaiveTime, bool)> {
    let text = text.trim();
    if text == "24:00" {
        return NaiveTime::from_hms_opt(0, 0, 0).map(|t| (t, true));
    }
    NaiveTime::parse_from_str(text, "%H:%M")
        .ok()
        .map(|t| (t, false))
}

/// Elapsed time between two wall-clock readings, formatted `HH:MM`.
///
/// Returns `None` when either side is missing or unparsable.
pub fn flight_duration(departure: &str, arrival: &str) -> Option<String> {
    if is_no_data(departure) || is_no_data(arrival) {
        return None;
    }
    let (takeoff, takeoff_next_day) = parse_clock(departure)?;
    let (landing, landing_next_day) = parse_clock(arrival)?;

    let mut days = 0;
    if landing_next_day {
        days += 1;
    }
    if takeoff_next_day {
        days -= 1;
    }
    if landing < takeoff || landing_next_day {
        days += 1;
    }

    let elapsed = landing.signed_duration_since(takeoff) + Duration::days(days);
    Some(format_minutes(elapsed.num_minutes().rem_euclid(MINUTES_PER_DAY)))
}

/// Format a minute count as zero-padded `HH:MM`.
pub fn format_minutes(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parse a stored `H:MM` / `HH:MM` duration back into minutes.
pub fn parse_duration_minutes(text: &str) -> Option<i64> {
    if is_no_data(text) {
        return None;
    }
    let (hours, minutes) = text.trim().split_once(':')?;
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
