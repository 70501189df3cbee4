//! eodsync CLI: sync, status, registry and config commands.
//!
//! Commands:
//! - `sync`: bootstrap, backfill and catch up the store from the snapshot source
//! - `status`: report stored history per partition
//! - `registry import`: load instrument listings from a TOML file into the store
//! - `config show`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use eodsync_core::config::SyncConfig;
use eodsync_core::domain::SourceKind;
use eodsync_core::registry::Registry;
use eodsync_core::source::HttpSnapshotClient;
use eodsync_core::store::{BarStore, SqliteStore};
use eodsync_core::sync::{NoProgress, RunSummary, StdoutProgress, SyncOrchestrator, SyncProgress};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "eodsync",
    version,
    about = "eodsync: incremental sync of end-of-day market snapshots"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides `store.path`).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the store up to date with the snapshot source.
    Sync {
        /// Scratch directory for downloaded archives (overrides `scratch.dir`).
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Treat this date (YYYY-MM-DD) as today. Defaults to the local date.
        #[arg(long)]
        as_of: Option<String>,

        /// Which source family to sync.
        #[arg(long, value_enum, default_value_t = FamilyArg::All)]
        family: FamilyArg,

        /// Backfill from a cumulative snapshot even when history exists,
        /// filling interior gaps.
        #[arg(long, default_value_t = false)]
        repair: bool,

        /// Suppress per-date progress output.
        #[arg(long, default_value_t = false)]
        quiet: bool,
    },
    /// Report stored history per partition.
    Status,
    /// Reference registry commands.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Import `[[listings]]` from a TOML file into the store.
    Import {
        /// Registry TOML file.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Transaction,
    Index,
    All,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.store)?;

    match cli.command {
        Commands::Sync {
            scratch_dir,
            as_of,
            family,
            repair,
            quiet,
        } => run_sync(config, scratch_dir, as_of, family, repair, quiet),
        Commands::Status => run_status(&config),
        Commands::Registry { action } => match action {
            RegistryAction::Import { file } => run_registry_import(&config, &file),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        },
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, store: Option<PathBuf>) -> Result<SyncConfig> {
    let mut config = match path {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(store) = store {
        config.store.path = store;
    }
    Ok(config)
}

fn run_sync(
    mut config: SyncConfig,
    scratch_dir: Option<PathBuf>,
    as_of: Option<String>,
    family: FamilyArg,
    repair: bool,
    quiet: bool,
) -> Result<()> {
    if let Some(dir) = scratch_dir {
        config.scratch.dir = dir;
    }
    config.validate()?;

    let today = as_of
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("--as-of must be YYYY-MM-DD")?
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let families = match family {
        FamilyArg::Transaction => vec![SourceKind::Transaction],
        FamilyArg::Index => vec![SourceKind::Index],
        FamilyArg::All => config.enabled_families(),
    };
    if families.is_empty() {
        bail!("no source family enabled in the config");
    }

    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("opening store {}", config.store.path.display()))?;
    if families.contains(&SourceKind::Transaction) && store.listing_count()? == 0 {
        tracing::warn!(
            "the instrument registry is empty; every transaction bar will be skipped \
             (run `eodsync registry import <file>` first)"
        );
    }
    let source = HttpSnapshotClient::from_config(&config)?;

    let progress: &dyn SyncProgress = if quiet { &NoProgress } else { &StdoutProgress };
    let summary = SyncOrchestrator::new(&config, &source, &store)
        .with_families(families)
        .with_repair(repair)
        .with_progress(progress)
        .work_as_of(today)?;

    print_summary(&summary, today);
    Ok(())
}

fn run_status(config: &SyncConfig) -> Result<()> {
    let path = &config.store.path;
    if !path.exists() {
        println!("Store does not exist: {}", path.display());
        return Ok(());
    }

    let store = SqliteStore::open(path)?;
    let extents = store.partition_extents()?;

    println!("Store: {}", path.display());
    println!("Registered instruments: {}", store.listing_count()?);
    if extents.is_empty() {
        println!("No bars stored.");
        return Ok(());
    }

    println!();
    println!(
        "{:<12} {:<12} {:<12} {:<12} {:>8}",
        "Family", "Group", "First", "Last", "Dates"
    );
    println!("{}", "-".repeat(60));
    for extent in &extents {
        println!(
            "{:<12} {:<12} {:<12} {:<12} {:>8}",
            extent.partition.kind.as_str(),
            extent.partition.group_key,
            extent.first.to_string(),
            extent.last.to_string(),
            extent.dates
        );
    }
    Ok(())
}

fn run_registry_import(config: &SyncConfig, file: &Path) -> Result<()> {
    let registry = Registry::from_file(file).map_err(anyhow::Error::msg)?;
    let store = SqliteStore::open(&config.store.path)?;
    let written = store.upsert_listings(&registry.listings)?;

    println!(
        "Imported {written} of {} listing(s) from {} into {}",
        registry.listing_count(),
        file.display(),
        config.store.path.display()
    );
    for (exchange, count) in registry.exchanges() {
        println!("  {exchange:<8} {count}");
    }
    for warning in coverage_warnings(&registry, &config.transaction.groups) {
        tracing::warn!("{warning}");
    }
    Ok(())
}

/// Mismatches between the registry's exchanges and the synced groups.
fn coverage_warnings(registry: &Registry, groups: &[String]) -> Vec<String> {
    let mut warnings: Vec<String> = groups
        .iter()
        .filter(|group| registry.exchange_codes(group).is_empty())
        .map(|group| format!("no listings on {group}; its transaction bars will be skipped"))
        .collect();
    warnings.extend(
        registry
            .exchange_names()
            .into_iter()
            .filter(|name| !groups.iter().any(|g| g.eq_ignore_ascii_case(name)))
            .map(|name| format!("listings on {name} are not in transaction.groups")),
    );
    warnings
}

fn print_summary(summary: &RunSummary, today: NaiveDate) {
    println!();
    println!("=== Sync Result (as of {today}) ===");
    for flow in &summary.flows {
        println!();
        println!("--- {} ---", flow.family);
        if let Some(date) = flow.bootstrapped_from {
            println!("Bootstrapped from: {date}");
        }
        match (flow.committed_dates.first(), flow.last_committed()) {
            (Some(first), Some(last)) => println!(
                "Dates committed:   {} ({first} to {last})",
                flow.committed_dates.len()
            ),
            _ => println!("Dates committed:   0"),
        }
        println!("Not published:     {}", flow.not_published.len());
        if !flow.retried_dates.is_empty() {
            println!("Retried:           {}", flow.retried_dates.len());
        }
        println!("Rows written:      {}", flow.rows_written);
        println!("Already present:   {}", flow.rows_already_present);
        println!("Rows dropped:      {}", flow.rows_dropped);
        println!("Rows skipped:      {}", flow.rows_skipped());
        for (reason, count) in &flow.skipped {
            println!("  {reason}: {count}");
        }
        if !flow.skipped_entities.is_empty() {
            let sample: Vec<&str> = flow
                .skipped_entities
                .iter()
                .take(10)
                .map(String::as_str)
                .collect();
            let more = flow.skipped_entities.len().saturating_sub(sample.len());
            let suffix = if more > 0 {
                format!(" (+{more} more)")
            } else {
                String::new()
            };
            println!("  entities: {}{suffix}", sample.join(", "));
        }
        if !flow.schema_failures.is_empty() {
            println!("Schema failures:   {}", flow.schema_failures.len());
            for failure in &flow.schema_failures {
                println!("  {} {}: {}", failure.date, failure.table, failure.error);
            }
        }
    }
}
