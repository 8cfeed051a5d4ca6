//! PostgreSQL backend: shared deployment with PostGIS point columns.
//!
//! Requires the `postgres` feature flag. PostGIS is optional: when the
//! extension is missing the generated geometry columns are not created and
//! the plain lat/lon columns remain the only location data.

#![cfg(feature = "postgres")]

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::warn;

use flightplan_core::record::ResolvedFlightRecord;
use flightplan_core::types::UNKNOWN_AIRCRAFT_TYPE;

use crate::db::{FlightStore, RegionCount, RegionRow, StoreError, StoreStats, StoreTx};

const PG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    region_id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS flights (
    id BIGSERIAL PRIMARY KEY,
    flight_id TEXT UNIQUE NOT NULL,
    drone_type TEXT NOT NULL,
    takeoff_lat DOUBLE PRECISION,
    takeoff_lon DOUBLE PRECISION,
    landing_lat DOUBLE PRECISION,
    landing_lon DOUBLE PRECISION,
    flight_date DATE,
    takeoff_time TIME,
    landing_time TIME,
    flight_duration INTERVAL,
    region_id INTEGER NOT NULL REFERENCES regions(region_id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_flights_region ON flights(region_id);
CREATE INDEX IF NOT EXISTS idx_flights_date ON flights(flight_date);
"#;

const POSTGIS_SETUP: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

ALTER TABLE flights ADD COLUMN IF NOT EXISTS takeoff_coordinates geometry(Point, 4326)
    GENERATED ALWAYS AS (ST_SetSRID(ST_MakePoint(takeoff_lon, takeoff_lat), 4326)) STORED;
ALTER TABLE flights ADD COLUMN IF NOT EXISTS landing_coordinates geometry(Point, 4326)
    GENERATED ALWAYS AS (ST_SetSRID(ST_MakePoint(landing_lon, landing_lat), 4326)) STORED;

CREATE INDEX IF NOT EXISTS idx_flights_takeoff_gist ON flights USING GIST (takeoff_coordinates);
"#;

/// PostgreSQL backend with connection pooling.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL and create the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

        sqlx::raw_sql(PG_SCHEMA).execute(&pool).await?;

        if let Err(e) = sqlx::raw_sql(POSTGIS_SETUP).execute(&pool).await {
            warn!("PostGIS setup failed, storing plain coordinates only: {e}");
        }

        Ok(PgStore { pool })
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn region_row(row: &sqlx::postgres::PgRow) -> Result<RegionRow, sqlx::Error> {
    Ok(RegionRow {
        region_id: row.try_get("region_id")?,
        name: row.try_get("name")?,
    })
}

#[async_trait]
impl FlightStore for PgStore {
    async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let flights: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flights")
            .fetch_one(&self.pool)
            .await?;
        let regions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM regions")
            .fetch_one(&self.pool)
            .await?;
        let row = sqlx::query(
            "SELECT to_char(MIN(flight_date), 'YYYY-MM-DD') AS first,
                    to_char(MAX(flight_date), 'YYYY-MM-DD') AS last
             FROM flights",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            flights,
            regions,
            first_flight_date: row.try_get("first")?,
            last_flight_date: row.try_get("last")?,
        })
    }

    async fn region_counts(&self) -> Result<Vec<RegionCount>, StoreError> {
        let rows = sqlx::query(
            "SELECT r.region_id, r.name, COUNT(f.id) AS n
             FROM regions r LEFT JOIN flights f ON f.region_id = r.region_id
             GROUP BY r.region_id, r.name
             ORDER BY n DESC, r.name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RegionCount {
                    region_id: row.try_get("region_id")?,
                    name: row.try_get("name")?,
                    flights: row.try_get("n")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_region_by_name(&mut self, name: &str) -> Result<Option<RegionRow>, StoreError> {
        let row = sqlx::query("SELECT region_id, name FROM regions WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(region_row).transpose()?)
    }

    async fn find_region_by_id(&mut self, region_id: i32) -> Result<Option<RegionRow>, StoreError> {
        let row = sqlx::query("SELECT region_id, name FROM regions WHERE region_id = $1")
            .bind(region_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(region_row).transpose()?)
    }

    async fn insert_region(&mut self, region_id: i32, name: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO regions (region_id, name) VALUES ($1, $2)")
            .bind(region_id)
            .bind(name)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn flight_exists(&mut self, flight_id: &str) -> Result<bool, StoreError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM flights WHERE flight_id = $1")
            .bind(flight_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(found.is_some())
    }

    async fn insert_flight(
        &mut self,
        flight_id: &str,
        flight: &ResolvedFlightRecord,
        region_id: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO flights (flight_id, drone_type, takeoff_lat, takeoff_lon,
                landing_lat, landing_lon, flight_date, takeoff_time, landing_time,
                flight_duration, region_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                     $10::bigint * INTERVAL '1 minute', $11)",
        )
        .bind(flight_id)
        .bind(flight.aircraft_type.as_deref().unwrap_or(UNKNOWN_AIRCRAFT_TYPE))
        .bind(flight.departure.map(|p| p.lat))
        .bind(flight.departure.map(|p| p.lon))
        .bind(flight.arrival.map(|p| p.lat))
        .bind(flight.arrival.map(|p| p.lon))
        .bind(flight.flight_date)
        .bind(flight.departure_time)
        .bind(flight.arrival_time)
        .bind(flight.duration_minutes)
        .bind(region_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
