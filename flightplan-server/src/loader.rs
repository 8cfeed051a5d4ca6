//! Ingestion loader: final table rows into the flight store.
//!
//! One transaction per batch. Regions are looked up by name and created on
//! first sight; flights are keyed by flight id and an existing id is skipped,
//! never updated. Any store failure rolls the whole batch back.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use flightplan_core::columns;
use flightplan_core::types::RowError;
use flightplan_core::{ResolvedFlightRecord, Table};

use crate::db::{FlightStore, StoreError, StoreTx};
use crate::pipeline::SkippedRow;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("line {line}: invalid region id {value:?}")]
    InvalidRegionId { line: usize, value: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub rows: usize,
    /// Flights newly written by this batch.
    pub committed: usize,
    pub duplicates: usize,
    pub missing_flight_id: usize,
    pub regions_created: usize,
    /// Incoming region ids already owned by a differently named region.
    pub region_conflicts: usize,
    /// Cells that were present but could not be parsed; stored as NULL.
    pub unparsed_cells: usize,
    pub skipped: Vec<SkippedRow>,
}

/// Header spellings accepted as a stray first row.
const HEADER_MARKERS: [&str; 2] = [columns::FLIGHT_ID_HEADER, "flight_id"];

fn is_header_row(cells: &[String]) -> bool {
    cells
        .first()
        .map(|c| HEADER_MARKERS.contains(&c.trim().trim_start_matches('\u{feff}')))
        .unwrap_or(false)
}

/// Load one batch and commit it.
pub async fn load<S: FlightStore + ?Sized>(store: &S, table: &Table) -> Result<LoadReport, LoadError> {
    let mut tx = store.begin().await?;
    match load_rows(&mut tx, table).await {
        Ok(report) => {
            tx.commit().await?;
            info!(
                committed = report.committed,
                duplicates = report.duplicates,
                regions_created = report.regions_created,
                skipped = report.skipped.len(),
                "batch committed"
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

async fn load_rows<'a>(tx: &mut Box<dyn StoreTx + 'a>, table: &Table) -> Result<LoadReport, LoadError> {
    let mut report = LoadReport::default();
    // region name -> id already settled in this batch
    let mut regions: HashMap<String, i32> = HashMap::new();

    for (i, row) in table.rows.iter().enumerate() {
        // Store calls may complete without suspending; a caller's timeout
        // only fires at a yield.
        tokio::task::yield_now().await;

        if i == 0 && is_header_row(&row.cells) {
            continue;
        }
        report.rows += 1;

        let record = match ResolvedFlightRecord::from_cells(&row.cells) {
            Ok(record) => record,
            Err(e @ RowError::TooFewColumns { .. }) => {
                report.skipped.push(SkippedRow {
                    line: row.line,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(RowError::InvalidRegionId(value)) => {
                return Err(LoadError::InvalidRegionId {
                    line: row.line,
                    value,
                });
            }
        };

        if !record.unparsed.is_empty() {
            report.unparsed_cells += record.unparsed.len();
            debug!(line = row.line, columns = ?record.unparsed, "unparsable cells stored as empty");
        }

        let Some(flight_id) = record.flight_id.as_deref() else {
            report.missing_flight_id += 1;
            report.skipped.push(SkippedRow {
                line: row.line,
                reason: "no flight id".into(),
            });
            continue;
        };
        if record.region.is_empty() {
            report.skipped.push(SkippedRow {
                line: row.line,
                reason: "empty region name".into(),
            });
            continue;
        }

        let region_id = match regions.get(&record.region) {
            Some(id) => *id,
            None => {
                let id = settle_region(tx, &record, &mut report).await?;
                regions.insert(record.region.clone(), id);
                id
            }
        };

        if tx.flight_exists(flight_id).await? {
            report.duplicates += 1;
            continue;
        }
        tx.insert_flight(flight_id, &record, region_id).await?;
        report.committed += 1;
    }

    Ok(report)
}

/// Existing region by name, else by id (a conflict), else a new row.
async fn settle_region<'a>(
    tx: &mut Box<dyn StoreTx + 'a>,
    record: &ResolvedFlightRecord,
    report: &mut LoadReport,
) -> Result<i32, LoadError> {
    if let Some(existing) = tx.find_region_by_name(&record.region).await? {
        return Ok(existing.region_id);
    }
    if let Some(owner) = tx.find_region_by_id(record.region_id).await? {
        report.region_conflicts += 1;
        warn!(
            region = %record.region,
            region_id = record.region_id,
            owner = %owner.name,
            "region id already taken, attaching flights to the existing region"
        );
        return Ok(owner.region_id);
    }
    tx.insert_region(record.region_id, &record.region).await?;
    report.regions_created += 1;
    debug!(region = %record.region, region_id = record.region_id, "created region");
    Ok(record.region_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::db::{RegionCount, RegionRow, SqliteStore, StoreStats};
    use flightplan_core::types::NO_DATA;

    fn final_table(rows: &[[&str; 10]]) -> Table {
        let mut table = Table::new(&columns::FINAL);
        for (i, cells) in rows.iter().enumerate() {
            table.push(i + 2, cells.iter().map(|c| c.to_string()).collect());
        }
        table
    }

    const MOSCOW: [&str; 10] = [
        "12345",
        "BLA",
        "55.50 37.50",
        "55.75 37.75",
        "15.01.25",
        "09:00",
        "10:15",
        "01:15",
        "Москва",
        "77",
    ];

    const TVER: [&str; 10] = [
        "777",
        NO_DATA,
        "bad coords",
        NO_DATA,
        NO_DATA,
        NO_DATA,
        NO_DATA,
        NO_DATA,
        "Тверская область",
        "69",
    ];

    #[tokio::test]
    async fn test_load_and_reload_is_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        let batch = final_table(&[MOSCOW, TVER]);

        let first = load(&store, &batch).await.unwrap();
        assert_eq!(first.committed, 2);
        assert_eq!(first.regions_created, 2);
        assert_eq!(first.unparsed_cells, 1);

        let second = load(&store, &batch).await.unwrap();
        assert_eq!(second.committed, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.regions_created, 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.flights, 2);
        assert_eq!(stats.regions, 2);
    }

    #[tokio::test]
    async fn test_duplicates_within_batch() {
        let store = SqliteStore::open_memory().unwrap();
        let report = load(&store, &final_table(&[MOSCOW, MOSCOW])).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn test_header_row_and_short_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let mut table = Table::default();
        table.push(1, columns::FINAL.iter().map(|h| h.to_string()).collect());
        table.push(2, vec!["1".into(), "BLA".into()]);
        table.push(3, MOSCOW.iter().map(|c| c.to_string()).collect());

        let report = load(&store, &table).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.committed, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].line, 2);
    }

    #[tokio::test]
    async fn test_headerless_file_keeps_first_flight() {
        let store = SqliteStore::open_memory().unwrap();
        let text = "12345,BLA,55.50 37.50,55.75 37.75,15.01.25,09:00,10:15,01:15,Москва,77\n\
                    777,BLA,55.50 37.50,Нет данных,15.01.25,Нет данных,Нет данных,Нет данных,Москва,77\n";
        let table = Table::read_csv_rows(text.as_bytes()).unwrap();

        let report = load(&store, &table).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.committed, 2);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_file_with_header_skips_it() {
        let store = SqliteStore::open_memory().unwrap();
        let mut buf = Vec::new();
        final_table(&[MOSCOW]).write_csv(&mut buf).unwrap();
        let table = Table::read_csv_rows(buf.as_slice()).unwrap();

        let report = load(&store, &table).await.unwrap();
        assert_eq!(report.rows, 1);
        assert_eq!(report.committed, 1);
    }

    #[tokio::test]
    async fn test_missing_flight_id_skipped() {
        let store = SqliteStore::open_memory().unwrap();
        let mut row = MOSCOW;
        row[columns::FLIGHT_ID] = NO_DATA;
        let report = load(&store, &final_table(&[row])).await.unwrap();
        assert_eq!(report.committed, 0);
        assert_eq!(report.missing_flight_id, 1);
    }

    #[tokio::test]
    async fn test_region_id_conflict_reuses_existing() {
        let store = SqliteStore::open_memory().unwrap();
        let mut other = TVER;
        other[columns::REGION] = "Другой регион";
        other[columns::REGION_ID] = "77";
        other[columns::FLIGHT_ID] = "888";

        let report = load(&store, &final_table(&[MOSCOW, other])).await.unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(report.regions_created, 1);
        assert_eq!(report.region_conflicts, 1);

        let counts = store.region_counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].flights, 2);
    }

    #[tokio::test]
    async fn test_invalid_region_id_aborts_batch() {
        let store = SqliteStore::open_memory().unwrap();
        let mut bad = TVER;
        bad[columns::REGION_ID] = "x";
        let err = load(&store, &final_table(&[MOSCOW, bad])).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidRegionId { line: 3, .. }));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.flights, 0);
        assert_eq!(stats.regions, 0);
    }

    // -- failure injection ---------------------------------------------------

    /// Fails the n-th flight insert of every transaction.
    struct FailingStore {
        inner: SqliteStore,
        fail_at: usize,
    }

    struct FailingTx<'a> {
        inner: Box<dyn StoreTx + 'a>,
        inserts: usize,
        fail_at: usize,
    }

    #[async_trait]
    impl FlightStore for FailingStore {
        async fn begin<'a>(&'a self) -> Result<Box<dyn StoreTx + 'a>, StoreError> {
            Ok(Box::new(FailingTx {
                inner: self.inner.begin().await?,
                inserts: 0,
                fail_at: self.fail_at,
            }))
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            self.inner.stats().await
        }

        async fn region_counts(&self) -> Result<Vec<RegionCount>, StoreError> {
            self.inner.region_counts().await
        }
    }

    #[async_trait]
    impl<'a> StoreTx for FailingTx<'a> {
        async fn find_region_by_name(&mut self, name: &str) -> Result<Option<RegionRow>, StoreError> {
            self.inner.find_region_by_name(name).await
        }

        async fn find_region_by_id(&mut self, region_id: i32) -> Result<Option<RegionRow>, StoreError> {
            self.inner.find_region_by_id(region_id).await
        }

        async fn insert_region(&mut self, region_id: i32, name: &str) -> Result<(), StoreError> {
            self.inner.insert_region(region_id, name).await
        }

        async fn flight_exists(&mut self, flight_id: &str) -> Result<bool, StoreError> {
            self.inner.flight_exists(flight_id).await
        }

        async fn insert_flight(
            &mut self,
            flight_id: &str,
            flight: &ResolvedFlightRecord,
            region_id: i32,
        ) -> Result<(), StoreError> {
            self.inserts += 1;
            if self.inserts == self.fail_at {
                return Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
            }
            self.inner.insert_flight(flight_id, flight, region_id).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_batch() {
        let store = SqliteStore::open_memory().unwrap();
        let mut table = Table::new(&columns::FINAL);
        for n in 0..20_000 {
            let mut cells: Vec<String> = MOSCOW.iter().map(|c| c.to_string()).collect();
            cells[columns::FLIGHT_ID] = format!("F{n}");
            table.push(n + 2, cells);
        }

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(std::time::Duration::from_millis(5), load(&store, &table)).await;
        assert!(result.is_err(), "batch should not finish inside the timeout");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.flights, 0);
        assert_eq!(stats.regions, 0);
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back_batch() {
        let store = FailingStore {
            inner: SqliteStore::open_memory().unwrap(),
            fail_at: 2,
        };
        let err = load(&store, &final_table(&[MOSCOW, TVER])).await.unwrap_err();
        assert!(matches!(err, LoadError::Store(_)));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.flights, 0);
        assert_eq!(stats.regions, 0);
    }
}
