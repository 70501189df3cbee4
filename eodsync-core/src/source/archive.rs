//! Archive staging: persist a downloaded snapshot, extract it, and read the
//! expected tables.
//!
//! Layout under the scratch root:
//! - `{family}/{yyyymmdd}-{mode}.zip` (written atomically: .tmp then rename)
//! - `{family}/{yyyymmdd}-{mode}/` (extracted entries)
//! - `{family}/{yyyymmdd}-{mode}.fetch.json` (sidecar: URL, size, BLAKE3 hash)

use super::layout::TableSpec;
use super::FetchError;
use crate::domain::{FetchMode, RawTable, SnapshotBatch, SourceKind, SubBatch};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar describing one fetched archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRecord {
    pub url: String,
    pub family: SourceKind,
    pub fetch_date: NaiveDate,
    pub mode: FetchMode,
    pub byte_size: usize,
    pub blake3: String,
    pub fetched_at: chrono::NaiveDateTime,
}

impl FetchRecord {
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(io::Error::other)
    }
}

/// Stage archive bytes in the scratch directory and decompose them into a
/// `SnapshotBatch`.
///
/// A corrupt archive is a transport failure. A table absent from the archive
/// is not: it yields a `SubBatch` without a table.
pub fn unpack(
    scratch: &Path,
    family: SourceKind,
    date: NaiveDate,
    mode: FetchMode,
    url: &str,
    bytes: &[u8],
    tables: Vec<TableSpec>,
) -> Result<SnapshotBatch, FetchError> {
    let family_dir = scratch.join(family.as_str());
    fs::create_dir_all(&family_dir)?;

    let stem = format!("{}-{}", date.format("%Y%m%d"), mode.as_str());
    let zip_path = family_dir.join(format!("{stem}.zip"));
    let tmp_path = family_dir.join(format!("{stem}.zip.tmp"));
    fs::write(&tmp_path, bytes)?;
    if let Err(e) = fs::rename(&tmp_path, &zip_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    let record = FetchRecord {
        url: url.to_string(),
        family,
        fetch_date: date,
        mode,
        byte_size: bytes.len(),
        blake3: blake3::hash(bytes).to_hex().to_string(),
        fetched_at: chrono::Local::now().naive_local(),
    };
    let sidecar = serde_json::to_string_pretty(&record).map_err(io::Error::other)?;
    fs::write(family_dir.join(format!("{stem}.fetch.json")), sidecar)?;

    let extract_dir = family_dir.join(&stem);
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FetchError::transport(url, format!("corrupt archive: {e}")))?;
    archive
        .extract(&extract_dir)
        .map_err(|e| FetchError::transport(url, format!("extraction failed: {e}")))?;
    debug!(url, entries = archive.len(), dir = %extract_dir.display(), "archive extracted");

    let index = index_files(&extract_dir)?;
    let mut sub_batches = Vec::with_capacity(tables.len());
    for spec in tables {
        let table = match index.get(&spec.file_name.to_lowercase()) {
            Some(path) => {
                let file = fs::File::open(path)?;
                Some(RawTable::from_csv(file).map_err(|e| {
                    FetchError::transport(url, format!("reading {}: {e}", spec.file_name))
                })?)
            }
            None => None,
        };
        sub_batches.push(SubBatch {
            table_name: spec.file_name,
            grouping: spec.grouping,
            table,
        });
    }

    Ok(SnapshotBatch {
        family,
        fetch_date: date,
        mode,
        sub_batches,
    })
}

/// Map lowercased file name → path for every file below `dir`. Archives
/// sometimes nest tables in a folder, so lookup goes by final path component.
fn index_files(dir: &Path) -> io::Result<HashMap<String, PathBuf>> {
    let mut index = HashMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                index.insert(name.to_lowercase(), path);
            }
        }
    }
    Ok(index)
}
