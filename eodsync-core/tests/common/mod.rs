//! Shared fixtures: a scripted snapshot source that serves in-memory zip
//! archives through the production naming layout and extraction path.

#![allow(dead_code)]

use chrono::NaiveDate;
use eodsync_core::config::SyncConfig;
use eodsync_core::domain::{FetchMode, Grouping, SnapshotBatch, SourceKind};
use eodsync_core::source::{self, FetchError, SnapshotLayout, SnapshotSource};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

pub const HEADER: &str = "<Ticker>,<DTYYYYMMDD>,<Open>,<High>,<Low>,<Close>,<Volume>";

pub type FetchKey = (SourceKind, FetchMode, NaiveDate);

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// CafeF-style CSV with one bar per `(ticker, date)`.
pub fn csv(rows: &[(&str, NaiveDate)]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (i, (ticker, date)) in rows.iter().enumerate() {
        let close = 10.0 + i as f64;
        out.push_str(&format!(
            "{ticker},{},{:.1},{:.1},{:.1},{close:.1},{}\n",
            date.format("%Y%m%d"),
            close - 0.5,
            close + 1.0,
            close - 1.0,
            1000 + i
        ));
    }
    out
}

/// Rows for every ticker on every date.
pub fn grid(tickers: &[&'static str], dates: &[NaiveDate]) -> Vec<(&'static str, NaiveDate)> {
    dates
        .iter()
        .flat_map(|d| tickers.iter().map(move |t| (*t, *d)))
        .collect()
}

pub fn zip_bytes(entries: &[(String, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serves published archives; everything else is a 404.
pub struct ScriptedSource {
    transaction: SnapshotLayout,
    index: SnapshotLayout,
    archives: HashMap<FetchKey, Vec<u8>>,
    broken: HashSet<FetchKey>,
    calls: Mutex<Vec<FetchKey>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::with_config(&SyncConfig::default())
    }

    /// Use the naming layouts of `config`.
    pub fn with_config(config: &SyncConfig) -> Self {
        let config = config.clone();
        Self {
            transaction: SnapshotLayout::new(config.transaction),
            index: SnapshotLayout::new(config.index),
            archives: HashMap::new(),
            broken: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn layout(&self, family: SourceKind) -> &SnapshotLayout {
        match family {
            SourceKind::Transaction => &self.transaction,
            SourceKind::Index => &self.index,
        }
    }

    /// Publish an archive. `tables` maps group key (exchange code, or `""`
    /// for the single index table) to CSV content; groups left out are
    /// absent from the archive.
    pub fn publish(
        &mut self,
        family: SourceKind,
        mode: FetchMode,
        date: NaiveDate,
        tables: &[(&str, String)],
    ) {
        let entries: Vec<(String, String)> = self
            .layout(family)
            .tables(date, mode)
            .into_iter()
            .filter_map(|spec| {
                let key = match &spec.grouping {
                    Grouping::Fixed(group) => group.as_str(),
                    Grouping::PerEntity => "",
                };
                tables
                    .iter()
                    .find(|(group, _)| *group == key)
                    .map(|(_, content)| (spec.file_name.clone(), content.clone()))
            })
            .collect();
        self.archives
            .insert((family, mode, date), zip_bytes(&entries));
    }

    /// Publish raw bytes as the archive.
    pub fn publish_raw(&mut self, family: SourceKind, mode: FetchMode, date: NaiveDate, bytes: Vec<u8>) {
        self.archives.insert((family, mode, date), bytes);
    }

    /// Make a fetch fail with a transport error.
    pub fn break_at(&mut self, family: SourceKind, mode: FetchMode, date: NaiveDate) {
        self.broken.insert((family, mode, date));
    }

    pub fn calls(&self) -> Vec<FetchKey> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, family: SourceKind) -> Vec<(FetchMode, NaiveDate)> {
        self.calls()
            .into_iter()
            .filter(|(f, _, _)| *f == family)
            .map(|(_, mode, date)| (mode, date))
            .collect()
    }
}

impl SnapshotSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        family: SourceKind,
        date: NaiveDate,
        mode: FetchMode,
        scratch: &Path,
    ) -> Result<SnapshotBatch, FetchError> {
        let key = (family, mode, date);
        self.calls.lock().unwrap().push(key);

        let url = self.layout(family).url(date, mode);
        if self.broken.contains(&key) {
            return Err(FetchError::Transport {
                url,
                message: "connection reset".into(),
            });
        }
        match self.archives.get(&key) {
            Some(bytes) => source::unpack(
                scratch,
                family,
                date,
                mode,
                &url,
                bytes,
                self.layout(family).tables(date, mode),
            ),
            None => Err(FetchError::NotYetPublished { url }),
        }
    }
}
