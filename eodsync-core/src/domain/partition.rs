//! Partition identity: which stream of dated records a row belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source family. Each family runs as its own sub-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Per-instrument bars, partitioned by exchange.
    Transaction,
    /// Market-index bars, partitioned by index code.
    Index,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Transaction, SourceKind::Index];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Transaction => "transaction",
            SourceKind::Index => "index",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transaction" | "transactions" => Ok(SourceKind::Transaction),
            "index" | "indices" => Ok(SourceKind::Index),
            other => Err(format!("unknown source kind '{other}'")),
        }
    }
}

/// `(source_kind, group_key)`, e.g. `(transaction, HSX)` or `(index, VNINDEX)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub kind: SourceKind,
    pub group_key: String,
}

impl Partition {
    pub fn new(kind: SourceKind, group_key: impl Into<String>) -> Self {
        Self {
            kind,
            group_key: group_key.into(),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.group_key)
    }
}
