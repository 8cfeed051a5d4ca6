//! Flight store: async backend trait and the SQLite implementation.
//!
//! Schema: regions (name unique, numeric id primary key) and flights
//! (flight id unique, region foreign key). A batch writes through one
//! `StoreTx`; dropping a transaction without committing rolls it back.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use flightplan_core::record::ResolvedFlightRecord;
use flightplan_core::types::UNKNOWN_AIRCRAFT_TYPE;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    region_id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS flights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_id TEXT UNIQUE NOT NULL,
    drone_type TEXT NOT NULL,
    takeoff_lat REAL,
    takeoff_lon REAL,
    landing_lat REAL,
    landing_lon REAL,
    flight_date TEXT,
    takeoff_time TEXT,
    landing_time TEXT,
    flight_duration_minutes INTEGER,
    region_id INTEGER NOT NULL REFERENCES regions(region_id),
    created_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flights_region ON flights(region_id);
CREATE INDEX IF NOT EXISTS idx_flights_date ON flights(flight_date);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionRow {
    pub region_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub flights: i64,
    pub regions: i64,
    pub first_flight_date: Option<String>,
    pub last_flight_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionCount {
    pub region_id: i32,
    pub name: String,
    pub flights: i64,
}

// ---------------------------------------------------------------------------
// Backend traits
// ---------------------------------------------------------------------------

/// A destination store for flight batches.
#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Start the single write transaction of a batch.
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError>;
    async fn stats(&self) -> Result<StoreStats, StoreError>;
    /// Flights per region, busiest first.
    async fn region_counts(&self) -> Result<Vec<RegionCount>, StoreError>;
}

/// One open batch transaction. Writes are visible to later reads in the same
/// transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_region_by_name(&mut self, name: &str) -> Result<Option<RegionRow>, StoreError>;
    async fn find_region_by_id(&mut self, region_id: i32) -> Result<Option<RegionRow>, StoreError>;
    async fn insert_region(&mut self, region_id: i32, name: &str) -> Result<(), StoreError>;
    async fn flight_exists(&mut self, flight_id: &str) -> Result<bool, StoreError>;
    async fn insert_flight(
        &mut self,
        flight_id: &str,
        flight: &ResolvedFlightRecord,
        region_id: i32,
    ) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite flight store. One connection, serialized behind an async mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }
}

pub struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteTx<'_> {
    fn finish(&mut self, sql: &str) -> Result<(), StoreError> {
        self.finished = true;
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

#[async_trait]
impl FlightStore for SqliteStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().await;
        let flights: i64 = conn.query_row("SELECT COUNT(*) FROM flights", [], |r| r.get(0))?;
        let regions: i64 = conn.query_row("SELECT COUNT(*) FROM regions", [], |r| r.get(0))?;
        let (first_flight_date, last_flight_date) = conn.query_row(
            "SELECT MIN(flight_date), MAX(flight_date) FROM flights",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(StoreStats {
            flights,
            regions,
            first_flight_date,
            last_flight_date,
        })
    }

    async fn region_counts(&self) -> Result<Vec<RegionCount>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT r.region_id, r.name, COUNT(f.id) AS n
             FROM regions r LEFT JOIN flights f ON f.region_id = r.region_id
             GROUP BY r.region_id, r.name
             ORDER BY n DESC, r.name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(RegionCount {
                region_id: r.get(0)?,
                name: r.get(1)?,
                flights: r.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl<'c> StoreTx for SqliteTx<'c> {
    async fn find_region_by_name(&mut self, name: &str) -> Result<Option<RegionRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT region_id, name FROM regions WHERE name = ?1",
                params![name],
                |r| {
                    Ok(RegionRow {
                        region_id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    async fn find_region_by_id(&mut self, region_id: i32) -> Result<Option<RegionRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT region_id, name FROM regions WHERE region_id = ?1",
                params![region_id],
                |r| {
                    Ok(RegionRow {
                        region_id: r.get(0)?,
                        name: r.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    async fn insert_region(&mut self, region_id: i32, name: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO regions (region_id, name) VALUES (?1, ?2)",
            params![region_id, name],
        )?;
        Ok(())
    }

    async fn flight_exists(&mut self, flight_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM flights WHERE flight_id = ?1",
                params![flight_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_flight(
        &mut self,
        flight_id: &str,
        flight: &ResolvedFlightRecord,
        region_id: i32,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO flights (flight_id, drone_type, takeoff_lat, takeoff_lon,
                landing_lat, landing_lon, flight_date, takeoff_time, landing_time,
                flight_duration_minutes, region_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                flight_id,
                flight.aircraft_type.as_deref().unwrap_or(UNKNOWN_AIRCRAFT_TYPE),
                flight.departure.map(|p| p.lat),
                flight.departure.map(|p| p.lon),
                flight.arrival.map(|p| p.lat),
                flight.arrival.map(|p| p.lon),
                flight.flight_date.map(|d| d.format("%Y-%m-%d").to_string()),
                flight.departure_time.map(|t| t.format("%H:%M").to_string()),
                flight.arrival_time.map(|t| t.format("%H:%M").to_string()),
                flight.duration_minutes,
                region_id,
                now(),
            ],
        )?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT")
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
