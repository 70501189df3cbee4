//! SQLite-backed store.
//!
//! Tables:
//! - `instrument`: the reference registry.
//! - `transaction_bar`: per-instrument bars, `entity_code` references
//!   `instrument(code)`, unique on `(exchange, entity_code, date)`.
//! - `index_bar`: market-index bars, unique on `(index_code, entity_code, date)`.
//! - `pending_snapshot`: snapshots with a rejected sub-batch, fetched again by
//!   the next run.
//!
//! Foreign keys are enforced, so a transaction bar for an unregistered ticker
//! fails its own statement and is reported as `UnknownEntity`.

use super::{BarStore, PartitionExtent, PendingSnapshot, RowOutcome, StoreError};
use crate::domain::{CanonicalRow, FetchMode, Partition, SourceKind};
use crate::registry::Listing;
use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS instrument (
    code               TEXT PRIMARY KEY,
    exchange           TEXT NOT NULL,
    company_name       TEXT NOT NULL DEFAULT '',
    listing_volume     INTEGER,
    free_float         REAL,
    first_trading_date TEXT
);

CREATE TABLE IF NOT EXISTS transaction_bar (
    id          INTEGER PRIMARY KEY,
    exchange    TEXT NOT NULL,
    entity_code TEXT NOT NULL REFERENCES instrument(code),
    date        TEXT NOT NULL,
    open        REAL NOT NULL,
    high        REAL NOT NULL,
    low         REAL NOT NULL,
    close       REAL NOT NULL,
    volume      INTEGER NOT NULL,
    UNIQUE (exchange, entity_code, date)
);
CREATE INDEX IF NOT EXISTS transaction_bar_exchange_date ON transaction_bar (exchange, date);

CREATE TABLE IF NOT EXISTS index_bar (
    id          INTEGER PRIMARY KEY,
    index_code  TEXT NOT NULL,
    entity_code TEXT NOT NULL,
    date        TEXT NOT NULL,
    open        REAL NOT NULL,
    high        REAL NOT NULL,
    low         REAL NOT NULL,
    close       REAL NOT NULL,
    volume      INTEGER NOT NULL,
    UNIQUE (index_code, entity_code, date)
);
CREATE INDEX IF NOT EXISTS index_bar_code_date ON index_bar (index_code, date);

CREATE TABLE IF NOT EXISTS pending_snapshot (
    family TEXT NOT NULL,
    date   TEXT NOT NULL,
    mode   TEXT NOT NULL,
    PRIMARY KEY (family, date, mode)
);
";

/// Table and group-key column of one source family.
fn table_of(kind: SourceKind) -> (&'static str, &'static str) {
    match kind {
        SourceKind::Transaction => ("transaction_bar", "exchange"),
        SourceKind::Index => ("index_bar", "index_code"),
    }
}

/// Store backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

fn volume_param(row: &CanonicalRow) -> Result<i64, rusqlite::Error> {
    i64::try_from(row.volume()).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl BarStore for SqliteStore {
    fn stored_dates(
        &self,
        partition: &Partition,
        as_of: NaiveDate,
    ) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let (table, group_col) = table_of(partition.kind);
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT DISTINCT date FROM {table} WHERE {group_col} = ?1 AND date <= ?2"
        ))?;
        let dates = stmt
            .query_map(params![partition.group_key, as_of], |row| {
                row.get::<_, NaiveDate>(0)
            })?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(dates)
    }

    fn latest_date(&self, kind: SourceKind) -> Result<Option<NaiveDate>, StoreError> {
        let (table, _) = table_of(kind);
        let conn = self.lock()?;
        let latest = conn
            .query_row(&format!("SELECT MAX(date) FROM {table}"), [], |row| {
                row.get::<_, Option<NaiveDate>>(0)
            })
            .optional()?
            .flatten();
        Ok(latest)
    }

    fn insert_or_ignore(
        &self,
        kind: SourceKind,
        rows: &[CanonicalRow],
    ) -> Result<Vec<RowOutcome>, StoreError> {
        let (table, group_col) = table_of(kind);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut outcomes = Vec::with_capacity(rows.len());
        let mut failure = None;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {table} ({group_col}, entity_code, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT ({group_col}, entity_code, date) DO NOTHING"
            ))?;
            for row in rows {
                let result = volume_param(row).and_then(|volume| {
                    stmt.execute(params![
                        row.group_key(),
                        row.entity_code(),
                        row.date(),
                        row.open(),
                        row.high(),
                        row.low(),
                        row.close(),
                        volume,
                    ])
                });
                match result {
                    Ok(0) => outcomes.push(RowOutcome::AlreadyPresent),
                    Ok(_) => outcomes.push(RowOutcome::Inserted),
                    Err(e) if is_foreign_key_violation(&e) => {
                        outcomes.push(RowOutcome::UnknownEntity)
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        tx.commit()?;

        match failure {
            Some(e) => Err(e.into()),
            None => {
                debug!(%kind, rows = rows.len(), "batch inserted");
                Ok(outcomes)
            }
        }
    }

    fn upsert_listings(&self, listings: &[Listing]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO instrument (code, exchange, company_name, listing_volume, free_float, first_trading_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (code) DO UPDATE SET
                     exchange = excluded.exchange,
                     company_name = excluded.company_name,
                     listing_volume = excluded.listing_volume,
                     free_float = excluded.free_float,
                     first_trading_date = COALESCE(excluded.first_trading_date, instrument.first_trading_date)",
            )?;
            for listing in listings {
                let volume = listing
                    .listing_volume
                    .map(i64::try_from)
                    .transpose()
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                written += stmt.execute(params![
                    listing.code,
                    listing.exchange,
                    listing.company_name,
                    volume,
                    listing.free_float,
                    listing.first_trading_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn listing_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM instrument", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn partition_extents(&self) -> Result<Vec<PartitionExtent>, StoreError> {
        let conn = self.lock()?;
        let mut extents = Vec::new();
        for kind in SourceKind::ALL {
            let (table, group_col) = table_of(kind);
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {group_col}, MIN(date), MAX(date), COUNT(DISTINCT date)
                 FROM {table} GROUP BY {group_col} ORDER BY {group_col}"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok(PartitionExtent {
                    partition: Partition::new(kind, row.get::<_, String>(0)?),
                    first: row.get(1)?,
                    last: row.get(2)?,
                    dates: row.get::<_, i64>(3)? as usize,
                })
            })?;
            for extent in rows {
                extents.push(extent?);
            }
        }
        Ok(extents)
    }

    fn mark_pending(
        &self,
        kind: SourceKind,
        snapshot: PendingSnapshot,
    ) -> Result<(), StoreError> {
        let (date, mode) = snapshot;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_snapshot (family, date, mode) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![kind.as_str(), date, mode.as_str()],
        )?;
        Ok(())
    }

    fn pending(&self, kind: SourceKind) -> Result<Vec<PendingSnapshot>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT date, mode FROM pending_snapshot WHERE family = ?1")?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut pending = rows
            .into_iter()
            .map(|(date, mode)| {
                FetchMode::from_name(&mode)
                    .map(|mode| (date, mode))
                    .ok_or_else(|| StoreError::Backend(format!("unknown fetch mode {mode:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        pending.sort();
        Ok(pending)
    }

    fn clear_pending(
        &self,
        kind: SourceKind,
        snapshots: &[PendingSnapshot],
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM pending_snapshot WHERE family = ?1 AND date = ?2 AND mode = ?3",
            )?;
            for (date, mode) in snapshots {
                stmt.execute(params![kind.as_str(), date, mode.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ohlcv;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn row(group: &str, code: &str, d: u32) -> CanonicalRow {
        CanonicalRow::new(
            group,
            code,
            day(d),
            Ohlcv {
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 1_000,
            },
        )
    }

    fn store_with(codes: &[&str]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let listings: Vec<_> = codes.iter().map(|c| Listing::new(*c, "HSX")).collect();
        store.upsert_listings(&listings).unwrap();
        store
    }

    #[test]
    fn unknown_ticker_is_isolated() {
        let store = store_with(&["AAA", "BBB", "DDD", "EEE"]);
        let rows = vec![
            row("HSX", "AAA", 2),
            row("HSX", "BBB", 2),
            row("HSX", "CCC", 2),
            row("HSX", "DDD", 2),
            row("HSX", "EEE", 2),
        ];
        let outcomes = store.insert_or_ignore(SourceKind::Transaction, &rows).unwrap();
        assert_eq!(
            outcomes,
            vec![
                RowOutcome::Inserted,
                RowOutcome::Inserted,
                RowOutcome::UnknownEntity,
                RowOutcome::Inserted,
                RowOutcome::Inserted,
            ]
        );
    }

    #[test]
    fn reinsert_is_already_present() {
        let store = store_with(&["AAA"]);
        let rows = vec![row("HSX", "AAA", 2)];
        store.insert_or_ignore(SourceKind::Transaction, &rows).unwrap();
        let again = store.insert_or_ignore(SourceKind::Transaction, &rows).unwrap();
        assert_eq!(again, vec![RowOutcome::AlreadyPresent]);
    }

    #[test]
    fn index_bars_need_no_registry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows = vec![row("VNINDEX", "VNINDEX", 2), row("VNINDEX", "VNINDEX", 3)];
        let outcomes = store.insert_or_ignore(SourceKind::Index, &rows).unwrap();
        assert!(outcomes.iter().all(|o| *o == RowOutcome::Inserted));
        assert_eq!(store.latest_date(SourceKind::Index).unwrap(), Some(day(3)));
        assert_eq!(store.latest_date(SourceKind::Transaction).unwrap(), None);
    }

    #[test]
    fn stored_dates_are_per_partition_and_bounded() {
        let store = store_with(&["AAA", "BBB"]);
        let rows = vec![
            row("HSX", "AAA", 2),
            row("HSX", "BBB", 2),
            row("HSX", "AAA", 4),
            row("HNX", "BBB", 3),
            row("HSX", "AAA", 8),
        ];
        store.insert_or_ignore(SourceKind::Transaction, &rows).unwrap();

        let hsx = Partition::new(SourceKind::Transaction, "HSX");
        let dates = store.stored_dates(&hsx, day(5)).unwrap();
        assert_eq!(dates.into_iter().collect::<Vec<_>>(), vec![day(2), day(4)]);
    }

    #[test]
    fn listings_upsert_updates_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut vnm = Listing::new("VNM", "HSX");
        vnm.first_trading_date = Some(day(2));
        store.upsert_listings(&[vnm]).unwrap();

        let mut updated = Listing::new("VNM", "HSX");
        updated.listing_volume = Some(42);
        assert_eq!(store.upsert_listings(&[updated]).unwrap(), 1);
        assert_eq!(store.listing_count().unwrap(), 1);

        let conn = store.lock().unwrap();
        let (volume, first): (Option<i64>, Option<NaiveDate>) = conn
            .query_row(
                "SELECT listing_volume, first_trading_date FROM instrument WHERE code = 'VNM'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(volume, Some(42));
        assert_eq!(first, Some(day(2)));
    }

    #[test]
    fn extents_cover_both_families() {
        let store = store_with(&["AAA"]);
        store
            .insert_or_ignore(
                SourceKind::Transaction,
                &[row("HSX", "AAA", 2), row("HSX", "AAA", 5)],
            )
            .unwrap();
        store
            .insert_or_ignore(SourceKind::Index, &[row("VNINDEX", "VNINDEX", 3)])
            .unwrap();

        let extents = store.partition_extents().unwrap();
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].partition, Partition::new(SourceKind::Transaction, "HSX"));
        assert_eq!((extents[0].first, extents[0].last, extents[0].dates), (day(2), day(5), 2));
        assert_eq!(extents[1].partition.kind, SourceKind::Index);
    }

    #[test]
    fn pending_snapshots_are_per_family_and_sorted() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = SourceKind::Transaction;
        store.mark_pending(tx, (day(5), FetchMode::Eod)).unwrap();
        store.mark_pending(tx, (day(3), FetchMode::Cumulative)).unwrap();
        store.mark_pending(tx, (day(5), FetchMode::Eod)).unwrap();
        store.mark_pending(SourceKind::Index, (day(4), FetchMode::Eod)).unwrap();

        assert_eq!(
            store.pending(tx).unwrap(),
            vec![(day(3), FetchMode::Cumulative), (day(5), FetchMode::Eod)]
        );

        store
            .clear_pending(tx, &[(day(5), FetchMode::Eod), (day(9), FetchMode::Eod)])
            .unwrap();
        assert_eq!(store.pending(tx).unwrap(), vec![(day(3), FetchMode::Cumulative)]);
        assert_eq!(store.pending(SourceKind::Index).unwrap().len(), 1);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db/eod.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_or_ignore(SourceKind::Index, &[row("VNINDEX", "VNINDEX", 2)])
                .unwrap();
            store
                .mark_pending(SourceKind::Index, (day(3), FetchMode::Eod))
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.latest_date(SourceKind::Index).unwrap(), Some(day(2)));
        assert_eq!(
            store.pending(SourceKind::Index).unwrap(),
            vec![(day(3), FetchMode::Eod)]
        );
    }
}
