//! Sync configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a config
//! that syncs the CafeF end-of-day archives into `eodsync.db`.

use crate::domain::SourceKind;
use crate::normalize::ColumnMap;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Errors from loading or validating a config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub store: StoreConfig,
    pub scratch: ScratchConfig,
    pub fetch: FetchConfig,
    pub bootstrap: BootstrapConfig,
    pub writer: WriterConfig,
    pub normalize: NormalizeConfig,
    #[serde(deserialize_with = "transaction_family")]
    pub transaction: FamilyConfig,
    #[serde(deserialize_with = "index_family")]
    pub index: FamilyConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            scratch: ScratchConfig::default(),
            fetch: FetchConfig::default(),
            bootstrap: BootstrapConfig::default(),
            writer: WriterConfig::default(),
            normalize: NormalizeConfig::default(),
            transaction: FamilyConfig::transactions(),
            index: FamilyConfig::indices(),
        }
    }
}

impl SyncConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Settings for one source family.
    pub fn family(&self, kind: SourceKind) -> &FamilyConfig {
        match kind {
            SourceKind::Transaction => &self.transaction,
            SourceKind::Index => &self.index,
        }
    }

    /// Families that take part in a sync run.
    pub fn enabled_families(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|k| self.family(*k).enabled)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writer.chunk_size == 0 {
            return Err(ConfigError::Invalid("writer.chunk_size must be > 0".into()));
        }
        if self.bootstrap.max_lookback_days == 0 && self.bootstrap.earliest_date.is_none() {
            return Err(ConfigError::Invalid(
                "bootstrap.max_lookback_days must be > 0".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be > 0".into()));
        }
        for kind in SourceKind::ALL {
            let family = self.family(kind);
            if !family.enabled {
                continue;
            }
            for (name, template) in [
                ("eod_url", &family.eod_url),
                ("cumulative_url", &family.cumulative_url),
                ("eod_table", &family.eod_table),
                ("cumulative_table", &family.cumulative_table),
            ] {
                if template.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("{kind}.{name} is empty")));
                }
            }
            if kind == SourceKind::Transaction && family.groups.is_empty() {
                return Err(ConfigError::Invalid(
                    "transaction.groups must list at least one exchange".into(),
                ));
            }
        }
        self.normalize.columns.validate()
    }
}

/// Where the store lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("eodsync.db"),
        }
    }
}

/// Scratch directory for downloaded and extracted archives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScratchConfig {
    pub dir: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
        }
    }
}

/// HTTP behaviour of the snapshot client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    /// Retries for connect/timeout/5xx failures. 404 is never retried.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub user_agent: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.base_delay_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 2,
            base_delay_ms: 500,
            user_agent: concat!("eodsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Bounds on the backward search for the newest cumulative snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub max_lookback_days: u32,
    /// Explicit lower bound; takes precedence over `max_lookback_days`.
    pub earliest_date: Option<NaiveDate>,
}

impl BootstrapConfig {
    /// Oldest date the probe may try, inclusive. A lookback reaching past
    /// the representable calendar stops at its first day.
    pub fn oldest_probe_date(&self, today: NaiveDate) -> NaiveDate {
        self.earliest_date.unwrap_or_else(|| {
            today
                .checked_sub_signed(Duration::days(i64::from(self.max_lookback_days)))
                .unwrap_or(NaiveDate::MIN)
        })
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_lookback_days: 3650,
            earliest_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriterConfig {
    /// Rows handed to the store per call.
    pub chunk_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self { chunk_size: 1000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Drop rows with inverted or negative OHLC values.
    pub validate_ohlc: bool,
    pub columns: ColumnMap,
}

/// URL and table-name templates of one source family.
///
/// Placeholders: `{yyyymmdd}`, `{ddmmyyyy}`, `{dd}`, `{mm}`, `{yyyy}`, and
/// `{group}` in table names.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FamilyConfig {
    pub enabled: bool,
    /// Sub-sources inside the archive. Empty for the index family, whose single
    /// table is split per index code.
    pub groups: Vec<String>,
    pub eod_url: String,
    pub cumulative_url: String,
    pub eod_table: String,
    pub cumulative_table: String,
}

impl FamilyConfig {
    /// CafeF per-exchange trading data.
    pub fn transactions() -> Self {
        Self {
            enabled: true,
            groups: vec!["HNX".into(), "HSX".into(), "UPCOM".into()],
            eod_url: "https://images1.cafef.vn/data/{yyyymmdd}/CafeF.SolieuGD.{ddmmyyyy}.zip".into(),
            cumulative_url:
                "https://images1.cafef.vn/data/{yyyymmdd}/CafeF.SolieuGD.Upto{ddmmyyyy}.zip".into(),
            eod_table: "CafeF.{group}.{dd}.{mm}.{yyyy}.csv".into(),
            cumulative_table: "CafeF.{group}.Upto{dd}.{mm}.{yyyy}.csv".into(),
        }
    }

    /// CafeF market indices.
    pub fn indices() -> Self {
        Self {
            enabled: true,
            groups: Vec::new(),
            eod_url: "https://images1.cafef.vn/data/{yyyymmdd}/CafeF.Index.{ddmmyyyy}.zip".into(),
            cumulative_url:
                "https://images1.cafef.vn/data/{yyyymmdd}/CafeF.Index.Upto{ddmmyyyy}.zip".into(),
            eod_table: "CafeF.INDEX.{dd}.{mm}.{yyyy}.csv".into(),
            cumulative_table: "CafeF.INDEX.Upto{dd}.{mm}.{yyyy}.csv".into(),
        }
    }
}

/// Partially specified family section; unset fields keep the family's defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FamilyOverrides {
    enabled: Option<bool>,
    groups: Option<Vec<String>>,
    eod_url: Option<String>,
    cumulative_url: Option<String>,
    eod_table: Option<String>,
    cumulative_table: Option<String>,
}

impl FamilyOverrides {
    fn apply(self, base: FamilyConfig) -> FamilyConfig {
        FamilyConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            groups: self.groups.unwrap_or(base.groups),
            eod_url: self.eod_url.unwrap_or(base.eod_url),
            cumulative_url: self.cumulative_url.unwrap_or(base.cumulative_url),
            eod_table: self.eod_table.unwrap_or(base.eod_table),
            cumulative_table: self.cumulative_table.unwrap_or(base.cumulative_table),
        }
    }
}

fn transaction_family<'de, D>(deserializer: D) -> Result<FamilyConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(FamilyOverrides::deserialize(deserializer)?.apply(FamilyConfig::transactions()))
}

fn index_family<'de, D>(deserializer: D) -> Result<FamilyConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(FamilyOverrides::deserialize(deserializer)?.apply(FamilyConfig::indices()))
}
