//! Scratch directory for downloaded and extracted archives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Scratch root, wiped and recreated once per run. Contents are left in place
/// after the run (including failed ones) for inspection.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Remove whatever a previous run left behind and recreate the root.
    pub fn acquire(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        match fs::remove_dir_all(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}
