//! Archive naming conventions: where a dated snapshot lives and which tables
//! it carries.

use crate::config::FamilyConfig;
use crate::domain::{FetchMode, Grouping};
use chrono::{Datelike, NaiveDate};

/// Render a URL or table-name template for one date.
///
/// Placeholders: `{yyyymmdd}`, `{ddmmyyyy}`, `{dd}`, `{mm}`, `{yyyy}`, `{group}`.
pub fn render(template: &str, date: NaiveDate, group: Option<&str>) -> String {
    let dd = format!("{:02}", date.day());
    let mm = format!("{:02}", date.month());
    let yyyy = format!("{:04}", date.year());

    let mut out = template
        .replace("{yyyymmdd}", &format!("{yyyy}{mm}{dd}"))
        .replace("{ddmmyyyy}", &format!("{dd}{mm}{yyyy}"))
        .replace("{dd}", &dd)
        .replace("{mm}", &mm)
        .replace("{yyyy}", &yyyy);
    if let Some(group) = group {
        out = out.replace("{group}", group);
    }
    out
}

/// One table expected inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub file_name: String,
    pub grouping: Grouping,
}

/// Naming layout of one source family.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    family: FamilyConfig,
}

impl SnapshotLayout {
    pub fn new(family: FamilyConfig) -> Self {
        Self { family }
    }

    pub fn url(&self, date: NaiveDate, mode: FetchMode) -> String {
        let template = match mode {
            FetchMode::Eod => &self.family.eod_url,
            FetchMode::Cumulative => &self.family.cumulative_url,
        };
        render(template, date, None)
    }

    /// Tables to extract, in configured group order. A family without groups
    /// has a single table whose rows are partitioned per entity.
    pub fn tables(&self, date: NaiveDate, mode: FetchMode) -> Vec<TableSpec> {
        let template = match mode {
            FetchMode::Eod => &self.family.eod_table,
            FetchMode::Cumulative => &self.family.cumulative_table,
        };

        if self.family.groups.is_empty() {
            return vec![TableSpec {
                file_name: render(template, date, None),
                grouping: Grouping::PerEntity,
            }];
        }

        self.family
            .groups
            .iter()
            .map(|group| TableSpec {
                file_name: render(template, date, Some(group)),
                grouping: Grouping::Fixed(group.clone()),
            })
            .collect()
    }
}
