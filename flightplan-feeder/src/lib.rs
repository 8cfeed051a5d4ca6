//! flightplan-feeder: readers for raw flight-plan exports.
//!
//! Turns a spreadsheet or delimited-text export into the raw table the
//! pipeline consumes, and can convert spreadsheets to `;`-delimited CSV.

pub mod source;

pub use source::{raw_messages, read_source, write_semicolon_csv, RawMessages, SourceFormat};
