//! Mode dispatch and parallel fan-out across partitions. Wired
//! by `qlc-cli`: the binary parses arguments into a [`RunnerMode`] and
//! [`Filters`] pair and hands them to [`Runner::run`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use qlc_persist::{Blob, Discovery, StateJournal};
use qlc_types::journal::PartitionStatus;
use qlc_types::partition::{PartitionKey, PartitionTriple};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::planner::Planner;
use crate::worker::{PartitionWorker, WorkResult};

/// Default bound on partitions processed concurrently within one day, from
/// `compact.py`'s `MAX_PARALLEL_DOWNLOADS` sibling constant for compaction
/// concurrency (kept separate since download and partition concurrency are
/// independent knobs).
pub const DEFAULT_MAX_PARALLEL_PARTITIONS: usize = 8;

/// The six run modes.
#[derive(Debug, Clone)]
pub enum RunnerMode {
    /// Yesterday only, idempotent.
    Daily,
    /// Planner forward catch-up from the journal's `last_compacted_date`.
    CatchUp,
    /// Planner reverse backfill, or an explicit inclusive date range.
    Backfill { from: Option<String>, to: Option<String> },
    /// Erases compact output and journal entries for an inclusive date range.
    Cleanup { from: String, to: String },
    /// Deletes the entire compact store. Dry-run unless `apply` is set.
    Wipe { apply: bool },
    /// Wipes, picks `partitions` small partitions on one recent date, runs
    /// them, and optionally wipes again afterward.
    Quicktest { partitions: usize, wipe_after: bool },
}

/// Granular filters and limits honored uniformly across modes.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub exchanges: Option<Vec<String>>,
    pub streams: Option<Vec<String>>,
    pub symbols: Option<Vec<String>>,
    /// Caps how many partitions of one date are processed.
    pub per_day_partition_limit: Option<usize>,
    /// Caps how many distinct symbols are processed in the whole run.
    pub per_run_symbol_limit: Option<usize>,
    /// Caps how many days a catch-up/backfill run advances.
    pub day_limit: Option<usize>,
    pub overwrite: bool,
    pub retry_quarantine: bool,
}

impl Filters {
    fn matches(&self, triple: &PartitionTriple) -> bool {
        if let Some(exchanges) = &self.exchanges {
            if !exchanges.iter().any(|e| e == &triple.exchange) {
                return false;
            }
        }
        if let Some(streams) = &self.streams {
            if !streams.iter().any(|s| s == &triple.stream) {
                return false;
            }
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.iter().any(|s| s == &triple.symbol) {
                return false;
            }
        }
        true
    }

    /// Applies the per-day partition cap and the whole-run symbol cap,
    /// tracking distinct symbols already admitted across calls.
    fn select<'a>(&self, triples: &'a [PartitionTriple], symbols_seen: &mut BTreeSet<String>) -> Vec<&'a PartitionTriple> {
        let mut selected = Vec::new();
        for triple in triples {
            if !self.matches(triple) {
                continue;
            }
            if let Some(limit) = self.per_day_partition_limit {
                if selected.len() >= limit {
                    break;
                }
            }
            if let Some(limit) = self.per_run_symbol_limit {
                let would_add_new = !symbols_seen.contains(&triple.symbol);
                if would_add_new && symbols_seen.len() >= limit {
                    continue;
                }
            }
            symbols_seen.insert(triple.symbol.clone());
            selected.push(triple);
        }
        selected
    }
}

/// Aggregate counts across a whole `Runner::run` call, returned to the CLI
/// for the final exit-code decision and the printed summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerSummary {
    pub days_processed: usize,
    pub success: usize,
    pub quarantine: usize,
    pub skipped: usize,
    pub no_files: usize,
    pub locked: usize,
    pub aborted: usize,
    pub hard_failures: usize,
    pub total_rows: u64,
}

impl RunnerSummary {
    fn record(&mut self, result: &WorkResult) {
        match result.status {
            PartitionStatus::Success => {
                self.success += 1;
                self.total_rows += result.rows;
            }
            PartitionStatus::Quarantine => {
                self.quarantine += 1;
                if result.error_type.is_some() {
                    self.hard_failures += 1;
                }
            }
            PartitionStatus::Skipped => self.skipped += 1,
            PartitionStatus::NoFiles => self.no_files += 1,
            PartitionStatus::Locked => self.locked += 1,
            PartitionStatus::Aborted => self.aborted += 1,
            PartitionStatus::DownloadFailed => self.hard_failures += 1,
            PartitionStatus::InProgress | PartitionStatus::Stalled => {}
        }
    }
}

/// Dispatches a [`RunnerMode`] into discovery, planning and bounded parallel
/// partition runs.
pub struct Runner {
    raw: Arc<dyn Blob>,
    compact: Arc<dyn Blob>,
    journal: Arc<StateJournal>,
    discovery: Discovery,
    shutdown: Arc<AtomicBool>,
    max_parallel_partitions: usize,
}

impl Runner {
    pub fn new(raw: Arc<dyn Blob>, compact: Arc<dyn Blob>) -> Self {
        let journal = Arc::new(StateJournal::new(Arc::clone(&compact)));
        let discovery = Discovery::new(Arc::clone(&raw));
        Runner {
            raw,
            compact,
            journal,
            discovery,
            shutdown: Arc::new(AtomicBool::new(false)),
            max_parallel_partitions: DEFAULT_MAX_PARALLEL_PARTITIONS,
        }
    }

    pub fn with_max_parallel_partitions(mut self, n: usize) -> Self {
        self.max_parallel_partitions = n;
        self
    }

    /// A flag the caller can flip from a `ctrl_c`/`SIGTERM` handler; polled
    /// cooperatively by every in-flight worker between batches.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub async fn run(&self, mode: RunnerMode, filters: &Filters) -> Result<RunnerSummary> {
        match self.journal.cleanup_stale_locks(None).await {
            Ok(removed) if removed > 0 => info!(removed, "swept stale partition locks"),
            Ok(_) => {}
            Err(err) => warn!(%err, "stale lock sweep failed, continuing"),
        }

        match mode {
            RunnerMode::Daily => {
                let date = qlc_types::CompactDate::yesterday_utc();
                self.run_days(&[date.as_str().to_string()], filters, false).await
            }
            RunnerMode::CatchUp => self.run_catch_up(filters).await,
            RunnerMode::Backfill { from, to } => self.run_backfill(from, to, filters).await,
            RunnerMode::Cleanup { from, to } => self.run_cleanup(&from, &to).await,
            RunnerMode::Wipe { apply } => self.run_wipe(apply).await,
            RunnerMode::Quicktest { partitions, wipe_after } => {
                self.run_quicktest(partitions, wipe_after, filters).await
            }
        }
    }

    async fn run_catch_up(&self, filters: &Filters) -> Result<RunnerSummary> {
        let last_compacted = self.journal.last_compacted_date().await;
        let today = qlc_types::CompactDate::today_utc().as_str().to_string();
        info!(?last_compacted, today, "starting catch-up");

        let raw_dates = self.discovery.discover_dates().await?;
        let days = journal_day_statuses(&self.journal).await;
        let partitions = journal_partition_statuses(&self.journal).await;
        let planner = Planner::new(&raw_dates, &days, &partitions, &today);
        let mut due = planner.plan_catch_up(last_compacted.as_deref());
        if let Some(limit) = filters.day_limit {
            due.truncate(limit);
        }

        if due.is_empty() {
            info!("no missing days to compact, catch-up complete");
            return Ok(RunnerSummary::default());
        }
        info!(days = due.len(), ?due, "catch-up required");

        let mut summary = RunnerSummary::default();
        for date in due {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!("shutdown requested, stopping catch-up loop");
                break;
            }
            let day_summary = self.run_one_day(&date, filters).await?;
            let day_failed = day_summary.hard_failures > 0;
            summary = merge_summary(summary, day_summary);
            summary.days_processed += 1;

            if day_failed {
                error!(date, "day incomplete, stopping catch-up loop");
                break;
            }
            self.journal.update_last_compacted_date(&date).await?;
            info!(date, "day fully compacted");
        }
        Ok(summary)
    }

    async fn run_backfill(&self, from: Option<String>, to: Option<String>, filters: &Filters) -> Result<RunnerSummary> {
        let dates = match (from, to) {
            (Some(from), Some(to)) => date_range(&from, &to),
            _ => {
                let raw_dates = self.discovery.discover_dates().await?;
                let today = qlc_types::CompactDate::today_utc().as_str().to_string();
                let days = journal_day_statuses(&self.journal).await;
                let partitions = journal_partition_statuses(&self.journal).await;
                let planner = Planner::new(&raw_dates, &days, &partitions, &today);
                planner.plan_reverse()
            }
        };
        self.run_days(&dates, filters, true).await
    }

    async fn run_days(&self, dates: &[String], filters: &Filters, limit_days: bool) -> Result<RunnerSummary> {
        let dates: Vec<String> = if limit_days {
            if let Some(limit) = filters.day_limit {
                dates.iter().take(limit).cloned().collect()
            } else {
                dates.to_vec()
            }
        } else {
            dates.to_vec()
        };

        let mut summary = RunnerSummary::default();
        for date in &dates {
            if self.shutdown.load(Ordering::Relaxed) {
                warn!("shutdown requested, stopping run");
                break;
            }
            let day_summary = self.run_one_day(date, filters).await?;
            summary = merge_summary(summary, day_summary);
            summary.days_processed += 1;
        }
        Ok(summary)
    }

    /// Discovers, filters and runs every partition for one date, bounded to
    /// `max_parallel_partitions` concurrent workers.
    async fn run_one_day(&self, date: &str, filters: &Filters) -> Result<RunnerSummary> {
        let triples = self.discovery.discover_partitions_for_date(date).await?;
        let mut symbols_seen = BTreeSet::new();
        let selected = filters.select(&triples, &mut symbols_seen);
        info!(date, total = triples.len(), selected = selected.len(), "partitions selected for date");

        let compact_date = qlc_types::CompactDate::parse(date)?;
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_partitions.max(1)));
        let check_shutdown: Arc<dyn Fn() -> bool + Send + Sync> = {
            let shutdown = Arc::clone(&self.shutdown);
            Arc::new(move || shutdown.load(Ordering::Relaxed))
        };

        let mut handles = Vec::with_capacity(selected.len());
        for triple in selected {
            let permit = Arc::clone(&semaphore);
            let key = PartitionKey::new(
                triple.exchange.clone(),
                triple.stream.clone(),
                triple.symbol.clone(),
                compact_date.clone(),
            );
            let worker = PartitionWorker::new(
                Arc::clone(&self.raw),
                Arc::clone(&self.compact),
                Arc::clone(&self.journal),
                Arc::clone(&check_shutdown),
            );
            let overwrite = filters.overwrite;
            let retry_quarantine = filters.retry_quarantine;
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                worker.compact_partition(&key, overwrite, retry_quarantine).await
            }));
        }

        let mut summary = RunnerSummary::default();
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    log_result(&result);
                    summary.record(&result);
                }
                Err(err) => {
                    error!(%err, "partition task panicked");
                    summary.hard_failures += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Erases compact artifacts and journal entries for every partition
    /// discovered in `[from, to]`, inclusive. Leftover `.tmp` uploads are not
    /// separately tracked, so `wipe` remains the tool of record for a fully
    /// clean slate; `cleanup` targets a bounded date range instead.
    async fn run_cleanup(&self, from: &str, to: &str) -> Result<RunnerSummary> {
        let dates = date_range(from, to);
        let mut summary = RunnerSummary::default();
        for date in dates {
            let triples = self.discovery.discover_partitions_for_date(&date).await.unwrap_or_default();
            let compact_date = qlc_types::CompactDate::parse(&date)?;
            for triple in triples {
                let key = PartitionKey::new(
                    triple.exchange.clone(),
                    triple.stream.clone(),
                    triple.symbol.clone(),
                    compact_date.clone(),
                );
                info!(partition = %key, "erasing compacted artifacts");
                for artifact_key in [key.compact_data_key(), key.compact_meta_key(), key.compact_quality_key()] {
                    self.compact.delete(&artifact_key).await.ok();
                    self.compact.delete(&format!("{artifact_key}.tmp")).await.ok();
                }
                self.compact.delete(&key.lock_key()).await.ok();
                self.journal.remove_partition(&key).await?;
                summary.skipped += 1;
            }
            self.journal.remove_day(&date).await?;
            summary.days_processed += 1;
        }
        Ok(summary)
    }

    /// Dry-run unless `apply`: lists (and, if `apply`, deletes) every key in
    /// the compact store, including the state journal document itself.
    async fn run_wipe(&self, apply: bool) -> Result<RunnerSummary> {
        let keys = self.compact.list_keys_and_metadata("").await?;
        info!(count = keys.len(), apply, "wipe: compact store inventory");
        if apply {
            for entry in &keys {
                self.compact.delete(&entry.key).await?;
            }
            info!(count = keys.len(), "wipe: deleted all compact store objects");
        } else {
            for entry in &keys {
                info!(key = %entry.key, "wipe (dry-run): would delete");
            }
        }
        Ok(RunnerSummary::default())
    }

    /// Wipes the compact store, picks up to `partitions` small partitions on
    /// the most recent raw date, runs them, and optionally wipes again.
    async fn run_quicktest(&self, partitions: usize, wipe_after: bool, filters: &Filters) -> Result<RunnerSummary> {
        self.run_wipe(true).await?;

        let raw_dates = self.discovery.discover_dates().await?;
        let Some(date) = raw_dates.iter().next_back().cloned() else {
            warn!("quicktest: no raw dates available");
            return Ok(RunnerSummary::default());
        };

        let mut quicktest_filters = filters.clone();
        quicktest_filters.per_day_partition_limit = Some(partitions);

        let summary = self.run_one_day(&date, &quicktest_filters).await?;

        if wipe_after {
            self.run_wipe(true).await?;
        }
        Ok(summary)
    }
}

fn merge_summary(mut total: RunnerSummary, day: RunnerSummary) -> RunnerSummary {
    total.success += day.success;
    total.quarantine += day.quarantine;
    total.skipped += day.skipped;
    total.no_files += day.no_files;
    total.locked += day.locked;
    total.aborted += day.aborted;
    total.hard_failures += day.hard_failures;
    total.total_rows += day.total_rows;
    total
}

fn log_result(result: &WorkResult) {
    match result.status {
        PartitionStatus::Success => info!(partition = %result.key, rows = result.rows, "success"),
        PartitionStatus::Quarantine => warn!(partition = %result.key, error = ?result.error, "quarantine"),
        PartitionStatus::Skipped => info!(partition = %result.key, reason = ?result.skip_reason, "skipped"),
        PartitionStatus::Locked => info!(partition = %result.key, "locked by another worker"),
        _ => info!(partition = %result.key, status = ?result.status, "terminal"),
    }
}

async fn journal_day_statuses(journal: &StateJournal) -> std::collections::HashMap<String, qlc_types::journal::DayStatus> {
    journal
        .all_days()
        .await
        .into_iter()
        .map(|(date, entry)| (date, entry.status))
        .collect()
}

async fn journal_partition_statuses(journal: &StateJournal) -> std::collections::HashMap<String, PartitionStatus> {
    journal
        .all_partitions()
        .await
        .into_iter()
        .map(|(key, entry)| (key, entry.status))
        .collect()
}

/// Inclusive ascending date range between two `YYYYMMDD` strings, used by
/// `cleanup` and explicit-range `backfill`.
fn date_range(from: &str, to: &str) -> Vec<String> {
    use chrono::NaiveDate;
    let Ok(start) = NaiveDate::parse_from_str(from, "%Y%m%d") else {
        return Vec::new();
    };
    let Ok(end) = NaiveDate::parse_from_str(to, "%Y%m%d") else {
        return Vec::new();
    };
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current.format("%Y%m%d").to_string());
        current += chrono::Duration::days(1);
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_is_inclusive_and_ascending() {
        assert_eq!(
            date_range("20240101", "20240103"),
            vec!["20240101", "20240102", "20240103"]
        );
    }

    #[test]
    fn filters_match_narrows_by_exchange_stream_symbol() {
        let filters = Filters {
            exchanges: Some(vec!["binance".to_string()]),
            streams: None,
            symbols: None,
            ..Default::default()
        };
        let okx = PartitionTriple {
            exchange: "okx".to_string(),
            stream: "trade".to_string(),
            symbol: "BTCUSDT".to_string(),
        };
        assert!(!filters.matches(&okx));
    }

    #[test]
    fn per_day_partition_limit_truncates_selection() {
        let filters = Filters {
            per_day_partition_limit: Some(1),
            ..Default::default()
        };
        let triples = vec![
            PartitionTriple {
                exchange: "binance".to_string(),
                stream: "trade".to_string(),
                symbol: "BTCUSDT".to_string(),
            },
            PartitionTriple {
                exchange: "binance".to_string(),
                stream: "trade".to_string(),
                symbol: "ETHUSDT".to_string(),
            },
        ];
        let mut seen = BTreeSet::new();
        assert_eq!(filters.select(&triples, &mut seen).len(), 1);
    }
}
