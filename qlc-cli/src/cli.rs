//! Argument surface for the compaction engine, spec.md §4.8/§6. Parsed with
//! `clap`'s derive API, the way `coinbuidl-moon`'s `cli.rs` structures a
//! subcommand-per-mode CLI; environment fallbacks for store configuration
//! are read separately by `qlc_compactor::Config::from_env` after `.env`
//! loading (see `main.rs`), matching `hut8-soar`'s `dotenvy::dotenv()` then
//! `env::var(...)` sequencing.

use clap::{Args, Parser, Subcommand};
use qlc_compactor::runner::{Filters, RunnerMode};

#[derive(Debug, Parser)]
#[command(name = "qlc-cli", about = "QuantLab columnar compaction engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compact yesterday's data for every discovered partition. Idempotent.
    Daily(FilterArgs),
    /// Forward catch-up from the journal's last_compacted_date to today.
    CatchUp(FilterArgs),
    /// Reverse backfill of pending dates, or an explicit [from, to] range.
    Backfill(BackfillArgs),
    /// Erase compacted output and journal entries for an inclusive date range.
    Cleanup(CleanupArgs),
    /// Delete the entire compact store. Dry-run unless --apply is passed.
    Wipe(WipeArgs),
    /// Wipe, compact a handful of small partitions on the latest raw date,
    /// and (by default) wipe again.
    Quicktest(QuicktestArgs),
    /// Fetch a raw object and print its parquet schema/row count, for the
    /// reproducer command a quarantined partition's journal entry emits.
    InspectRawObject(InspectArgs),
}

#[derive(Debug, Args, Default)]
pub struct FilterArgs {
    /// Comma-separated list of exchanges to include. Default: all discovered.
    #[arg(long, value_delimiter = ',')]
    pub exchanges: Option<Vec<String>>,
    /// Comma-separated list of streams to include.
    #[arg(long, value_delimiter = ',')]
    pub streams: Option<Vec<String>>,
    /// Comma-separated list of symbols to include.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
    /// Read the symbol allowlist from a file, one symbol per line, instead
    /// of (or in addition to) --symbols.
    #[arg(long)]
    pub symbols_file: Option<std::path::PathBuf>,
    /// Cap how many partitions of one day are processed.
    #[arg(long)]
    pub per_day_limit: Option<usize>,
    /// Cap how many distinct symbols are processed across the whole run.
    #[arg(long)]
    pub symbol_limit: Option<usize>,
    /// Cap how many days a catch-up/backfill run advances in one invocation.
    #[arg(long)]
    pub day_limit: Option<usize>,
    /// Reprocess partitions already marked success.
    #[arg(long)]
    pub overwrite: bool,
    /// Reprocess partitions previously quarantined.
    #[arg(long)]
    pub retry_quarantine: bool,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Start of an explicit YYYYMMDD range. Requires --to. Omit both to use
    /// the planner's reverse-backfill policy instead.
    #[arg(long)]
    pub from: Option<String>,
    /// End of an explicit YYYYMMDD range (inclusive).
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Start of the YYYYMMDD range to erase (inclusive).
    #[arg(long)]
    pub from: String,
    /// End of the YYYYMMDD range to erase (inclusive).
    #[arg(long)]
    pub to: String,
}

#[derive(Debug, Args)]
pub struct WipeArgs {
    /// Actually delete objects. Without this flag, only logs what would be
    /// deleted.
    #[arg(long)]
    pub apply: bool,
}

#[derive(Debug, Args)]
pub struct QuicktestArgs {
    #[command(flatten)]
    pub filters: FilterArgs,
    /// Number of small partitions to compact on the latest raw date.
    #[arg(long, default_value_t = 3)]
    pub partitions: usize,
    /// Skip the final wipe, leaving the quicktest output in place.
    #[arg(long)]
    pub no_wipe_after: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// The raw-store object key to fetch and inspect.
    #[arg(long)]
    pub key: String,
    /// The stream the object belongs to (unused beyond diagnostics output,
    /// kept so the reproducer command worker.rs emits is directly runnable).
    #[arg(long)]
    pub stream: Option<String>,
}

impl FilterArgs {
    /// Merges `--symbols` with `--symbols-file` (file entries appended,
    /// duplicates harmless since `Filters::matches` only checks membership)
    /// and builds the `Filters` the runner consumes.
    pub fn into_filters(self) -> anyhow::Result<Filters> {
        let mut symbols = self.symbols;
        if let Some(path) = &self.symbols_file {
            let contents = std::fs::read_to_string(path)
                .map_err(|err| anyhow::anyhow!("reading {}: {err}", path.display()))?;
            let from_file: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            symbols = Some(match symbols {
                Some(mut existing) => {
                    existing.extend(from_file);
                    existing
                }
                None => from_file,
            });
        }

        Ok(Filters {
            exchanges: self.exchanges,
            streams: self.streams,
            symbols,
            per_day_partition_limit: self.per_day_limit,
            per_run_symbol_limit: self.symbol_limit,
            day_limit: self.day_limit,
            overwrite: self.overwrite,
            retry_quarantine: self.retry_quarantine,
        })
    }
}

impl BackfillArgs {
    pub fn into_mode(&self) -> RunnerMode {
        RunnerMode::Backfill {
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn daily_parses_with_no_args() {
        let cli = Cli::try_parse_from(["qlc-cli", "daily"]).unwrap();
        assert!(matches!(cli.command, Command::Daily(_)));
    }

    #[test]
    fn filter_args_split_comma_lists() {
        let cli = Cli::try_parse_from([
            "qlc-cli",
            "catch-up",
            "--exchanges",
            "binance,coinbase",
            "--symbols",
            "BTC-USD",
        ])
        .unwrap();
        let Command::CatchUp(filters) = cli.command else {
            panic!("expected catch-up");
        };
        assert_eq!(
            filters.exchanges,
            Some(vec!["binance".to_string(), "coinbase".to_string()])
        );
        assert_eq!(filters.symbols, Some(vec!["BTC-USD".to_string()]));
    }

    #[test]
    fn cleanup_requires_from_and_to() {
        assert!(Cli::try_parse_from(["qlc-cli", "cleanup", "--from", "20260101"]).is_err());
        assert!(Cli::try_parse_from([
            "qlc-cli",
            "cleanup",
            "--from",
            "20260101",
            "--to",
            "20260102"
        ])
        .is_ok());
    }

    #[test]
    fn backfill_into_mode_carries_explicit_range() {
        let cli = Cli::try_parse_from([
            "qlc-cli",
            "backfill",
            "--from",
            "20260101",
            "--to",
            "20260105",
        ])
        .unwrap();
        let Command::Backfill(args) = cli.command else {
            panic!("expected backfill");
        };
        match args.into_mode() {
            RunnerMode::Backfill { from, to } => {
                assert_eq!(from.as_deref(), Some("20260101"));
                assert_eq!(to.as_deref(), Some("20260105"));
            }
            _ => panic!("expected RunnerMode::Backfill"),
        }
    }

    #[test]
    fn quicktest_defaults_to_three_partitions_and_wipes_after() {
        let cli = Cli::try_parse_from(["qlc-cli", "quicktest"]).unwrap();
        let Command::Quicktest(args) = cli.command else {
            panic!("expected quicktest");
        };
        assert_eq!(args.partitions, 3);
        assert!(!args.no_wipe_after);
    }

    #[test]
    fn symbols_file_merges_with_symbols_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.txt");
        std::fs::write(&path, "ETH-USD\n  \nSOL-USD\n").unwrap();

        let filters = FilterArgs {
            symbols: Some(vec!["BTC-USD".to_string()]),
            symbols_file: Some(path),
            ..Default::default()
        }
        .into_filters()
        .unwrap();

        assert_eq!(
            filters.symbols,
            Some(vec![
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
                "SOL-USD".to_string(),
            ])
        );
    }

    #[test]
    fn wipe_apply_flag_defaults_to_dry_run() {
        let cli = Cli::try_parse_from(["qlc-cli", "wipe"]).unwrap();
        let Command::Wipe(args) = cli.command else {
            panic!("expected wipe");
        };
        assert!(!args.apply);
    }
}
