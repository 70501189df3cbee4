//! Registry import and writer behaviour against the SQLite store.

use chrono::NaiveDate;
use eodsync_core::domain::{CanonicalRow, Ohlcv, Partition, SourceKind};
use eodsync_core::registry::Registry;
use eodsync_core::store::{BarStore, SqliteStore};
use eodsync_core::writer::{SkipReason, UpsertWriter};
use tempfile::TempDir;

const REGISTRY: &str = r#"
[[listings]]
code = "AAA"
exchange = "HSX"
company_name = "An Phat Holdings"

[[listings]]
code = "BBB"
exchange = "HNX"

[[listings]]
code = "DDD"
exchange = "HSX"

[[listings]]
code = "EEE"
exchange = "UPCOM"
"#;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
}

fn row(code: &str) -> CanonicalRow {
    CanonicalRow::new(
        "HSX",
        code,
        date(),
        Ohlcv {
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 25_000,
        },
    )
}

fn imported_store(tmp: &TempDir) -> SqliteStore {
    let path = tmp.path().join("registry.toml");
    std::fs::write(&path, REGISTRY).unwrap();
    let registry = Registry::from_file(&path).unwrap();

    let store = SqliteStore::open(&tmp.path().join("eod.db")).unwrap();
    assert_eq!(store.upsert_listings(&registry.listings).unwrap(), 4);
    store
}

#[test]
fn row_three_unknown_the_rest_written() {
    let tmp = TempDir::new().unwrap();
    let store = imported_store(&tmp);
    let writer = UpsertWriter::new(&store);

    let rows: Vec<_> = ["AAA", "BBB", "CCC", "DDD", "EEE"].into_iter().map(row).collect();
    let report = writer.commit(SourceKind::Transaction, rows).unwrap();

    assert_eq!(report.written, 4);
    assert_eq!(report.skipped, vec![(row("CCC"), SkipReason::UnknownEntity)]);
}

#[test]
fn commit_twice_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = imported_store(&tmp);
    let writer = UpsertWriter::with_chunk_size(&store, 2);

    let rows: Vec<_> = ["AAA", "BBB", "DDD"].into_iter().map(row).collect();
    let first = writer.commit(SourceKind::Transaction, rows.clone()).unwrap();
    let second = writer.commit(SourceKind::Transaction, rows).unwrap();

    assert_eq!(first.written, 3);
    assert_eq!(second.written, 0);
    assert_eq!(second.already_present, 3);

    let extents = store.partition_extents().unwrap();
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[0].partition, Partition::new(SourceKind::Transaction, "HSX"));
    assert_eq!(extents[0].dates, 1);
}

#[test]
fn reimporting_the_registry_is_an_update() {
    let tmp = TempDir::new().unwrap();
    let store = imported_store(&tmp);

    let registry = Registry::from_toml(REGISTRY).unwrap();
    store.upsert_listings(&registry.listings).unwrap();
    assert_eq!(store.listing_count().unwrap(), 4);
}
