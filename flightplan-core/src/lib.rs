//! flightplan-core: field extraction, duration, region resolution and id
//! mapping for flight-plan batch ingestion.
//!
//! No async, no logging, no database: stages are pure functions over tables
//! and the read-only gazetteer. This crate is the shared core used by both
//! `flightplan-feeder` (source conversion) and `flightplan-server` (pipeline,
//! loader and CLI).

pub mod config;
pub mod duration;
pub mod extract;
pub mod gazetteer;
pub mod geometry;
pub mod record;
pub mod region_id;
pub mod resolver;
pub mod table;
pub mod types;

// Re-export commonly used types at crate root
pub use duration::flight_duration;
pub use extract::{extract, extract_message};
pub use gazetteer::{Gazetteer, RegionIdx, RegionIndex};
pub use record::{ExtractedFlightRecord, RawFlightMessage, ResolvedFlightRecord};
pub use region_id::{RegionIdMap, DEFAULT_FALLBACK_REGION_ID};
pub use resolver::{Method, RegionResolver, Resolution};
pub use table::{columns, Row, Table};
pub use types::*;
