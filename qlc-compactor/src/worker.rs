//! The per-partition work pipeline, spec.md §4.7: pre-check, artifact
//! healing, lock, quality gate, download, merge, verify and atomic publish,
//! with quarantine-on-failure classification for diagnostics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use qlc_persist::{Blob, PartitionLockManager, StateJournal};
use qlc_types::error::{CompactorError, ErrorKind};
use qlc_types::journal::{DayStatus, PartitionEntry, PartitionStatus};
use qlc_types::metadata::MetadataSidecar;
use qlc_types::partition::PartitionKey;
use qlc_types::quality::{DayQuality, QualityDayReport, WindowReport};
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::merge::{self, MergeOptions};
use crate::quality::QualityEvaluator;

/// How many raw files this worker will download concurrently for one
/// partition, from `compact.py`'s `MAX_PARALLEL_DOWNLOADS` (spec.md §5:
/// "bounded worker pool... default fan-out 50").
pub const MAX_PARALLEL_DOWNLOADS: usize = 50;

/// Outcome of one `PartitionWorker::compact_partition` call. Distinct from
/// [`PartitionEntry`] (the journal's persisted shape): this carries
/// diagnostics the caller wants for logging and run-summary purposes but
/// that the journal itself doesn't need to retain.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub key: PartitionKey,
    pub status: PartitionStatus,
    pub rows: u64,
    pub total_size_bytes: u64,
    pub day_quality: DayQuality,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorKind>,
    pub failing_key: Option<String>,
    pub reproducer_cmd: Option<String>,
}

impl WorkResult {
    fn new(key: PartitionKey, status: PartitionStatus) -> Self {
        WorkResult {
            key,
            status,
            rows: 0,
            total_size_bytes: 0,
            day_quality: DayQuality::Unknown,
            skip_reason: None,
            error: None,
            error_type: None,
            failing_key: None,
            reproducer_cmd: None,
        }
    }
}

/// Runs the full compaction pipeline for one partition. `raw` and `compact`
/// may be the same store or two distinct ones (separate credentials per
/// spec.md §6); the worker never assumes which.
pub struct PartitionWorker {
    raw: Arc<dyn Blob>,
    compact: Arc<dyn Blob>,
    journal: Arc<StateJournal>,
    locks: PartitionLockManager,
    check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl PartitionWorker {
    pub fn new(
        raw: Arc<dyn Blob>,
        compact: Arc<dyn Blob>,
        journal: Arc<StateJournal>,
        check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        let locks = PartitionLockManager::new(Arc::clone(&compact));
        PartitionWorker {
            raw,
            compact,
            journal,
            locks,
            check_shutdown,
        }
    }

    /// Compacts a single `(exchange, stream, symbol, date)` partition,
    /// mirroring `compact.py`'s `compact_date_partition` step for step: state
    /// check, artifact healing, lock, in-progress, quality gate, list,
    /// download, merge, verify, atomic publish, journal success/quarantine,
    /// lock release.
    pub async fn compact_partition(&self, key: &PartitionKey, overwrite: bool, retry_quarantine: bool) -> WorkResult {
        if let Some(result) = self.pre_check(key, overwrite, retry_quarantine).await {
            return result;
        }
        if let Some(result) = self.heal_from_existing_artifacts(key, overwrite).await {
            return result;
        }

        let lock_key = key.lock_key();
        match self.locks.acquire(&lock_key).await {
            Ok(true) => {}
            Ok(false) => {
                info!(partition = %key, "skip: locked by another worker");
                return WorkResult::new(key.clone(), PartitionStatus::Locked);
            }
            Err(err) => {
                error!(partition = %key, %err, "failed to acquire partition lock");
                return WorkResult::new(key.clone(), PartitionStatus::Locked);
            }
        }

        let result = self.run_locked(key, overwrite).await;
        self.locks.release(&lock_key).await;
        result
    }

    /// Step 1: skip outright on a known-terminal status, unless overridden.
    async fn pre_check(&self, key: &PartitionKey, overwrite: bool, retry_quarantine: bool) -> Option<WorkResult> {
        let entry = self.journal.partition_entry(key).await;
        let status = entry.as_ref().map(|e| e.status);

        match status {
            Some(PartitionStatus::Success) if !overwrite => {
                let mut result = WorkResult::new(key.clone(), PartitionStatus::Skipped);
                result.skip_reason = Some("already_succeeded".to_string());
                Some(result)
            }
            Some(PartitionStatus::Quarantine) if !overwrite && !retry_quarantine => {
                info!(partition = %key, "skip: previously quarantined");
                let mut result = WorkResult::new(key.clone(), PartitionStatus::Quarantine);
                result.skip_reason = Some("already_quarantined".to_string());
                Some(result)
            }
            _ => None,
        }
    }

    /// Step 2: heal state left stale by a crashed worker. If the partition
    /// has no live lock but its three artifacts already exist, treat it as
    /// succeeded and update the journal instead of redoing the work, the way
    /// `compact.py` heals state from prior parallel runs.
    async fn heal_from_existing_artifacts(&self, key: &PartitionKey, overwrite: bool) -> Option<WorkResult> {
        if overwrite {
            return None;
        }
        let entry = self.journal.partition_entry(key).await;
        let healable = matches!(
            entry.as_ref().map(|e| e.status),
            None | Some(PartitionStatus::InProgress) | Some(PartitionStatus::Stalled)
        );
        if !healable {
            return None;
        }

        let lock_exists = self
            .compact
            .get(&key.lock_key())
            .await
            .map(|v| v.is_some())
            .unwrap_or(true); // conservative: assume a live lock on read errors
        if lock_exists {
            return None;
        }

        let artifacts_exist = self.exists(&key.compact_data_key()).await
            && self.exists(&key.compact_meta_key()).await
            && self.exists(&key.compact_quality_key()).await;
        if !artifacts_exist {
            return None;
        }

        let meta: Option<MetadataSidecar> = self
            .compact
            .get(&key.compact_meta_key())
            .await
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        let rows = meta.as_ref().map(|m| m.rows).unwrap_or(0);
        let day_quality = meta.as_ref().map(|m| m.day_quality).unwrap_or(DayQuality::Unknown);
        let post_filter_version = meta
            .as_ref()
            .and_then(|m| Some(m.post_filter_version.clone()))
            .unwrap_or_else(|| qlc_types::quality::POST_FILTER_VERSION.to_string());

        let healed_entry = PartitionEntry {
            status: PartitionStatus::Success,
            day_quality_post: Some(day_quality),
            post_filter_version: Some(post_filter_version),
            rows,
            total_size_bytes: 0,
            updated_at: Utc::now(),
            error_type: None,
            failing_key: None,
            error: None,
        };
        if let Err(err) = self.journal.log_partition_status(key, healed_entry).await {
            warn!(partition = %key, %err, "failed to write healed journal entry");
        }

        info!(partition = %key, "skip: artifacts already exist, state healed");
        let mut result = WorkResult::new(key.clone(), PartitionStatus::Skipped);
        result.skip_reason = Some("artifact_exists".to_string());
        result.rows = rows;
        Some(result)
    }

    async fn exists(&self, key: &str) -> bool {
        self.compact.get(key).await.map(|v| v.is_some()).unwrap_or(false)
    }

    /// Everything downstream of a successful lock acquisition, run under the
    /// caller's guarantee that the lock will be released regardless of how
    /// this returns.
    async fn run_locked(&self, key: &PartitionKey, overwrite: bool) -> WorkResult {
        let _ = overwrite;
        if let Err(err) = self
            .journal
            .log_partition_status(key, in_progress_entry())
            .await
        {
            warn!(partition = %key, %err, "failed to mark partition in_progress");
        }

        match self.run_pipeline(key).await {
            Ok(result) => {
                self.log_terminal(key, &result).await;
                result
            }
            Err(err) => {
                let result = self.classify_failure(key, err);
                self.log_terminal(key, &result).await;
                result
            }
        }
    }

    /// The quality-gate-through-publish sequence. `Ok` covers every outcome
    /// that is not an unexpected failure (quarantine-on-bad-quality, skip on
    /// partial data, no-files, download-failed and success are all `Ok`);
    /// `Err` covers merge/verify faults that need classification and a
    /// quarantine-with-diagnostics result.
    async fn run_pipeline(&self, key: &PartitionKey) -> Result<WorkResult> {
        let quality_report = self.fetch_quality_report(key.date.as_str()).await?;
        let day_quality = quality_report.day_quality;

        if day_quality == DayQuality::Bad {
            warn!(partition = %key, "quarantine: BAD day quality");
            let mut result = WorkResult::new(key.clone(), PartitionStatus::Quarantine);
            result.day_quality = day_quality;
            return Ok(result);
        }
        if day_quality == DayQuality::Partial {
            info!(partition = %key, "skip: PARTIAL day quality, waiting for more data");
            let mut result = WorkResult::new(key.clone(), PartitionStatus::Skipped);
            result.day_quality = day_quality;
            result.error = Some("Partial day data, retry expected".to_string());
            return Ok(result);
        }

        let raw_prefix = key.raw_prefix();
        let raw_files = self.list_raw_files(&raw_prefix).await?;
        if raw_files.is_empty() {
            let mut result = WorkResult::new(key.clone(), PartitionStatus::NoFiles);
            result.day_quality = day_quality;
            return Ok(result);
        }
        let total_size_bytes: u64 = raw_files.iter().map(|f| f.size_bytes).sum();

        let scratch = TempDir::new().context("creating partition download scratch directory")?;
        let (local_files, path_to_key) = self.download_files(&raw_files, scratch.path()).await;
        if local_files.is_empty() {
            let mut result = WorkResult::new(key.clone(), PartitionStatus::DownloadFailed);
            result.day_quality = day_quality;
            result.total_size_bytes = total_size_bytes;
            result.error = Some("No files downloaded".to_string());
            return Ok(result);
        }

        let output_path = scratch.path().join("data.parquet");
        let check_shutdown = Arc::clone(&self.check_shutdown);

        let outcome: Result<(merge::MergeCompletion, usize)> = async {
            let completion = self
                .run_merge(key, &local_files, &output_path, check_shutdown)
                .await?;
            self.verify_output(&output_path, completion.rows)?;
            Ok((completion, raw_files.len()))
        }
        .await;

        let (completion, source_files) = match outcome {
            Ok(ok) => ok,
            Err(err) => return Ok(self.build_quarantine(key, err, &path_to_key)),
        };

        let meta = MetadataSidecar {
            rows: completion.rows,
            ts_event_min: completion.ts_event_min,
            ts_event_max: completion.ts_event_max,
            sha256: completion.sha256.clone(),
            source_files,
            schema_version: 1,
            stream_type: key.stream.clone(),
            ordering_columns: MetadataSidecar::ordering_columns_default(),
            day_quality,
            post_filter_version: qlc_types::quality::POST_FILTER_VERSION.to_string(),
            compaction_version: Some(qlc_persist::PARTITION_LOCK_VERSION.to_string()),
            created_at: Some(Utc::now()),
        };

        if let Err(err) = self.publish(key, &output_path, &meta, &quality_report).await {
            return Ok(self.build_quarantine(key, err, &path_to_key));
        }

        let mut result = WorkResult::new(key.clone(), PartitionStatus::Success);
        result.rows = completion.rows;
        result.total_size_bytes = total_size_bytes;
        result.day_quality = day_quality;
        Ok(result)
    }

    async fn fetch_quality_report(&self, date: &str) -> Result<QualityDayReport> {
        let prefix = format!("quality/date={date}/");
        let entries = self
            .raw
            .list_keys_and_metadata(&prefix)
            .await
            .context("listing quality window files")?;

        let mut reports = Vec::new();
        for entry in entries {
            if !entry.key.ends_with(".json") {
                continue;
            }
            match self.raw.get(&entry.key).await {
                Ok(Some(bytes)) => match serde_json::from_slice::<WindowReport>(&bytes) {
                    Ok(report) => reports.push(report),
                    Err(err) => warn!(key = %entry.key, %err, "skipping malformed quality window"),
                },
                Ok(None) => {}
                Err(err) => warn!(key = %entry.key, %err, "failed to read quality window"),
            }
        }
        Ok(QualityEvaluator::evaluate(&reports))
    }

    /// Lists raw files under `prefix`, excluding anything that isn't a
    /// `.parquet` object or that looks like a dotfile sidecar
    /// (`._foo.parquet` or any path segment starting with `._`), matching
    /// `compact.py`'s `_list_raw_files`.
    async fn list_raw_files(&self, prefix: &str) -> Result<Vec<qlc_persist::BlobMetadata>> {
        let entries = self
            .raw
            .list_keys_and_metadata(prefix)
            .await
            .context("listing raw partition files")?;
        Ok(entries
            .into_iter()
            .filter(|e| e.key.ends_with(".parquet"))
            .filter(|e| !e.key.contains("/._"))
            .filter(|e| {
                !e.key
                    .rsplit('/')
                    .next()
                    .unwrap_or(&e.key)
                    .starts_with("._")
            })
            .collect())
    }

    /// Downloads every raw file to `dir` under `NNNN_<original-name>`,
    /// bounded to [`MAX_PARALLEL_DOWNLOADS`] concurrent transfers, matching
    /// `compact.py`'s `_download_files`. Returns the local paths sorted (so
    /// downstream ordering never depends on download completion order) and
    /// the local-path-to-raw-key map used by the quarantine reproducer.
    async fn download_files(
        &self,
        files: &[qlc_persist::BlobMetadata],
        dir: &Path,
    ) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
        let downloads = stream::iter(files.iter().enumerate().map(|(idx, file)| {
            let raw = Arc::clone(&self.raw);
            let dir = dir.to_path_buf();
            let key = file.key.clone();
            async move {
                let name = key.rsplit('/').next().unwrap_or(&key);
                let local_path = dir.join(format!("{idx:04}_{name}"));
                match raw.get(&key).await {
                    Ok(Some(bytes)) => match tokio::fs::write(&local_path, &bytes).await {
                        Ok(()) => Some((local_path, key)),
                        Err(err) => {
                            warn!(%key, %err, "failed to write downloaded file");
                            None
                        }
                    },
                    Ok(None) => {
                        warn!(%key, "raw file disappeared before download");
                        None
                    }
                    Err(err) => {
                        warn!(%key, %err, "failed to download raw file");
                        None
                    }
                }
            }
        }))
        .buffer_unordered(MAX_PARALLEL_DOWNLOADS)
        .filter_map(|result| async move { result })
        .collect::<Vec<_>>()
        .await;

        let mut local_files: Vec<PathBuf> = downloads.iter().map(|(path, _)| path.clone()).collect();
        local_files.sort();
        (local_files, downloads)
    }

    async fn run_merge(
        &self,
        key: &PartitionKey,
        local_files: &[PathBuf],
        output_path: &Path,
        check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Result<merge::MergeCompletion> {
        let options = MergeOptions::for_stream(&key.stream, check_shutdown);
        let inputs = local_files.to_vec();
        let output_path = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || merge::merge(&inputs, &output_path, options))
            .await
            .context("merge task panicked")?
    }

    /// Re-reads the written file to confirm the row count matches the
    /// merge's own count and that the trailing footer magic is intact,
    /// matching `compact.py`'s `_verify_output_integrity`.
    fn verify_output(&self, path: &Path, expected_rows: u64) -> Result<()> {
        let actual_rows = count_parquet_rows(path)?;
        if actual_rows != expected_rows {
            return Err(CompactorError::VerificationFailed(format!(
                "row count mismatch: expected {expected_rows}, got {actual_rows}"
            ))
            .into());
        }
        if !merge::has_parquet_trailing_magic(path)? {
            return Err(CompactorError::VerificationFailed("invalid parquet footer magic".to_string()).into());
        }
        Ok(())
    }

    /// Uploads all three artifacts under `.tmp` keys, then promotes each to
    /// its final key via read-then-write-then-delete (the `Blob` trait has
    /// no native copy; this is the portable equivalent of `compact.py`'s
    /// `copy_object` + `delete_object` promotion).
    async fn publish(
        &self,
        key: &PartitionKey,
        data_path: &Path,
        meta: &MetadataSidecar,
        quality: &QualityDayReport,
    ) -> Result<()> {
        let data_bytes = tokio::fs::read(data_path).await.context("reading merged output for upload")?;
        let meta_bytes = serde_json::to_vec_pretty(meta).context("serializing metadata sidecar")?;
        let quality_bytes = serde_json::to_vec_pretty(quality).context("serializing quality sidecar")?;

        let data_key = key.compact_data_key();
        let meta_key = key.compact_meta_key();
        let quality_key = key.compact_quality_key();

        self.upload_tmp(&data_key, Bytes::from(data_bytes)).await?;
        self.upload_tmp(&meta_key, Bytes::from(meta_bytes)).await?;
        self.upload_tmp(&quality_key, Bytes::from(quality_bytes)).await?;

        self.finalize(&data_key).await?;
        self.finalize(&meta_key).await?;
        self.finalize(&quality_key).await?;
        Ok(())
    }

    async fn upload_tmp(&self, key: &str, payload: Bytes) -> Result<()> {
        let tmp_key = format!("{key}.tmp");
        self.compact
            .set(&tmp_key, payload, qlc_persist::SetPrecondition::None)
            .await
            .with_context(|| format!("uploading {tmp_key}"))?;
        Ok(())
    }

    async fn finalize(&self, key: &str) -> Result<()> {
        let tmp_key = format!("{key}.tmp");
        info!(from = %tmp_key, to = %key, "promoting compacted artifact");
        let payload = self
            .compact
            .get(&tmp_key)
            .await
            .with_context(|| format!("reading {tmp_key} for promotion"))?
            .with_context(|| format!("{tmp_key} missing at promotion time"))?;
        self.compact
            .set(key, payload, qlc_persist::SetPrecondition::None)
            .await
            .with_context(|| format!("writing {key}"))?;
        self.compact
            .delete(&tmp_key)
            .await
            .with_context(|| format!("deleting {tmp_key}"))?;
        Ok(())
    }

    /// Classifies an unexpected pipeline failure (no path→key map available;
    /// only reached for faults before any file was downloaded) into a
    /// terminal status, matching `compact.py`'s outer `except Exception`
    /// block. A shutdown request is not a failure to quarantine over — it
    /// aborts cleanly so the next run picks the partition back up.
    fn classify_failure(&self, key: &PartitionKey, err: anyhow::Error) -> WorkResult {
        self.build_quarantine(key, err, &[])
    }

    /// Builds the quarantine (or abort, on shutdown) result for an
    /// unexpected failure, deriving `failing_key` by checking whether any
    /// downloaded file's local path appears in the rendered error message —
    /// the same substring heuristic as `compact.py`'s `_path_to_s3_key` scan.
    fn build_quarantine(&self, key: &PartitionKey, err: anyhow::Error, path_to_key: &[(PathBuf, String)]) -> WorkResult {
        if err.downcast_ref::<CompactorError>().is_some_and(|e| matches!(e, CompactorError::ShutdownRequested)) {
            warn!(partition = %key, "upload skipped due to shutdown");
            let mut result = WorkResult::new(key.clone(), PartitionStatus::Aborted);
            result.error = Some("Shutdown requested".to_string());
            return result;
        }

        let message = format!("{err:#}");
        let error_type = ErrorKind::classify(&message);

        let failing_key = path_to_key
            .iter()
            .find(|(path, _)| message.contains(&path.to_string_lossy().to_string()))
            .map(|(_, key)| key.clone())
            .or_else(|| path_to_key.first().map(|(_, key)| key.clone()));

        let reproducer_cmd = failing_key.as_ref().map(|failing_key| {
            format!(
                "qlc-cli inspect-raw-object --key '{failing_key}' --stream {}",
                key.stream
            )
        });

        error!(partition = %key, error_type = error_type.as_str(), failing_key = failing_key.as_deref().unwrap_or("none"), "quarantine: {message}");

        let mut result = WorkResult::new(key.clone(), PartitionStatus::Quarantine);
        result.error = Some(message);
        result.error_type = Some(error_type);
        result.failing_key = failing_key;
        result.reproducer_cmd = reproducer_cmd;
        result
    }

    async fn log_terminal(&self, key: &PartitionKey, result: &WorkResult) {
        let entry = PartitionEntry {
            status: result.status,
            day_quality_post: Some(result.day_quality),
            post_filter_version: Some(qlc_types::quality::POST_FILTER_VERSION.to_string()),
            rows: result.rows,
            total_size_bytes: result.total_size_bytes,
            updated_at: Utc::now(),
            error_type: result.error_type,
            failing_key: result.failing_key.clone(),
            error: result.error.clone(),
        };
        if let Err(err) = self.journal.log_partition_status(key, entry).await {
            warn!(partition = %key, %err, "failed to write terminal journal entry");
        }
        if matches!(
            result.status,
            PartitionStatus::Success | PartitionStatus::Quarantine | PartitionStatus::Skipped
        ) {
            if let Err(err) = self.journal.log_day_status(key.date.as_str(), day_status_for(result.status)).await {
                warn!(date = %key.date, %err, "failed to write day status");
            }
        }
    }
}

fn in_progress_entry() -> PartitionEntry {
    PartitionEntry {
        status: PartitionStatus::InProgress,
        day_quality_post: None,
        post_filter_version: None,
        rows: 0,
        total_size_bytes: 0,
        updated_at: Utc::now(),
        error_type: None,
        failing_key: None,
        error: None,
    }
}

fn day_status_for(status: PartitionStatus) -> DayStatus {
    match status {
        PartitionStatus::Success => DayStatus::Success,
        PartitionStatus::Quarantine => DayStatus::Quarantine,
        _ => DayStatus::Skipped,
    }
}

fn count_parquet_rows(path: &Path) -> Result<u64> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let metadata = arrow2::io::parquet::read::read_metadata(&mut reader)?;
    Ok(metadata.num_rows as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlc_persist::MemBlob;
    use qlc_types::CompactDate;
    use std::str::FromStr;

    fn key() -> PartitionKey {
        PartitionKey::new("binance", "trade", "BTCUSDT", CompactDate::from_str("20240102").unwrap())
    }

    fn worker() -> (PartitionWorker, Arc<dyn Blob>) {
        let blob: Arc<dyn Blob> = Arc::new(MemBlob::new());
        let journal = Arc::new(StateJournal::new(Arc::clone(&blob)));
        let worker = PartitionWorker::new(
            Arc::clone(&blob),
            Arc::clone(&blob),
            journal,
            Arc::new(|| false),
        );
        (worker, blob)
    }

    #[tokio::test]
    async fn skips_partition_already_marked_success() {
        let (worker, blob) = worker();
        let journal = StateJournal::new(Arc::clone(&blob));
        journal
            .log_partition_status(
                &key(),
                PartitionEntry {
                    status: PartitionStatus::Success,
                    day_quality_post: Some(DayQuality::Good),
                    post_filter_version: Some("1.0.0".to_string()),
                    rows: 10,
                    total_size_bytes: 100,
                    updated_at: Utc::now(),
                    error_type: None,
                    failing_key: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let result = worker.compact_partition(&key(), false, false).await;
        assert_eq!(result.status, PartitionStatus::Skipped);
        assert_eq!(result.skip_reason.as_deref(), Some("already_succeeded"));
    }

    #[tokio::test]
    async fn quarantined_partition_is_skipped_without_retry_flag() {
        let (worker, blob) = worker();
        let journal = StateJournal::new(Arc::clone(&blob));
        journal
            .log_partition_status(
                &key(),
                PartitionEntry {
                    status: PartitionStatus::Quarantine,
                    day_quality_post: Some(DayQuality::Bad),
                    post_filter_version: Some("1.0.0".to_string()),
                    rows: 0,
                    total_size_bytes: 0,
                    updated_at: Utc::now(),
                    error_type: None,
                    failing_key: None,
                    error: None,
                },
            )
            .await
            .unwrap();

        let result = worker.compact_partition(&key(), false, false).await;
        assert_eq!(result.status, PartitionStatus::Quarantine);
        assert_eq!(result.skip_reason.as_deref(), Some("already_quarantined"));
    }

    #[tokio::test]
    async fn no_raw_files_yields_no_files_status() {
        let (worker, _blob) = worker();
        let result = worker.compact_partition(&key(), false, false).await;
        assert_eq!(result.status, PartitionStatus::NoFiles);
    }

    #[tokio::test]
    async fn locked_partition_is_reported_as_locked() {
        let (worker, blob) = worker();
        blob.set(
            &key().lock_key(),
            Bytes::from_static(b"{}"),
            qlc_persist::SetPrecondition::None,
        )
        .await
        .unwrap();

        let result = worker.compact_partition(&key(), false, false).await;
        assert_eq!(result.status, PartitionStatus::Locked);
    }
}
