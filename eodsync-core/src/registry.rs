//! Reference registry: the instruments bars may be stored for.
//!
//! Stored as a TOML file of `[[listings]]` tables and imported into the store
//! before syncing. Transaction bars whose ticker is not registered are skipped
//! by the writer as unknown entities.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One listed instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub code: String,
    pub exchange: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_volume: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_float: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_trading_date: Option<NaiveDate>,
}

impl Listing {
    pub fn new(code: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            exchange: exchange.into(),
            company_name: String::new(),
            listing_volume: None,
            free_float: None,
            first_trading_date: None,
        }
    }
}

/// The complete registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Registry {
    #[serde(default)]
    pub listings: Vec<Listing>,
}

impl Registry {
    /// Load a registry from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("read registry file {}: {e}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a registry from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let registry: Self =
            toml::from_str(content).map_err(|e| format!("parse registry TOML: {e}"))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Codes must be non-empty and unique.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for listing in &self.listings {
            if listing.code.trim().is_empty() {
                return Err("registry listing with empty code".into());
            }
            if listing.exchange.trim().is_empty() {
                return Err(format!("listing {} has no exchange", listing.code));
            }
            if !seen.insert(listing.code.as_str()) {
                return Err(format!("duplicate listing code {}", listing.code));
            }
        }
        Ok(())
    }

    /// Codes listed on one exchange.
    pub fn exchange_codes(&self, exchange: &str) -> Vec<&str> {
        self.listings
            .iter()
            .filter(|l| l.exchange.eq_ignore_ascii_case(exchange))
            .map(|l| l.code.as_str())
            .collect()
    }

    /// Exchange names, sorted, with their listing counts.
    pub fn exchanges(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for listing in &self.listings {
            *counts.entry(listing.exchange.as_str()).or_default() += 1;
        }
        counts
    }

    /// Exchange names, sorted.
    pub fn exchange_names(&self) -> Vec<&str> {
        self.exchanges().into_keys().collect()
    }

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    /// Serialize the registry to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize registry: {e}"))
    }
}
