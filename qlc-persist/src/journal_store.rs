use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use qlc_types::journal::{DayEntry, DayStatus, JournalDocument, PartitionEntry, PartitionStatus};
use qlc_types::PartitionKey;
use tracing::{error, info, warn};

use crate::blob::{Blob, SetPrecondition};
use crate::lock::DocumentLock;

/// The key under which the single journal document lives.
pub const STATE_FILE_KEY: &str = "compacted/_state.json";

const LOCK_WAIT: Duration = Duration::from_secs(30);
const LOCK_TTL: Duration = Duration::from_secs(120);
const STALE_PARTITION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Read-modify-write access to the state journal.
///
/// The journal is a cache, not a source of truth: every write here is
/// best-effort (falls back to an unlocked write on lock contention per
/// `compact.py`'s `_update_state`) and the artifact-healing path in
/// `qlc-compactor::worker` can always reconstruct a partition's state from
/// its published artifacts if this document is lost or stale.
pub struct StateJournal {
    blob: Arc<dyn Blob>,
    state_key: String,
    lock: DocumentLock,
}

impl StateJournal {
    pub fn new(blob: Arc<dyn Blob>) -> Self {
        let lock = DocumentLock::new(Arc::clone(&blob), STATE_FILE_KEY);
        StateJournal {
            blob,
            state_key: STATE_FILE_KEY.to_string(),
            lock,
        }
    }

    async fn read(&self) -> JournalDocument {
        match self.blob.get(&self.state_key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                error!(%err, "state journal document is corrupt, starting from empty");
                JournalDocument::default()
            }),
            Ok(None) => JournalDocument::default(),
            Err(err) => {
                error!(%err, "failed to read state journal, starting from empty");
                JournalDocument::default()
            }
        }
    }

    async fn write(&self, doc: &JournalDocument) -> anyhow::Result<()> {
        let payload = Bytes::from(serde_json::to_vec_pretty(doc)?);
        self.blob.set(&self.state_key, payload, SetPrecondition::None).await?;
        Ok(())
    }

    /// Reads, mutates and writes back the journal document under the
    /// document lock. Falls back to an unlocked read-modify-write if the
    /// lock can't be acquired in time, to avoid blocking compaction progress
    /// on journal contention between many concurrent partition workers.
    async fn update(&self, mutate: impl FnOnce(&mut JournalDocument)) -> anyhow::Result<()> {
        let token = self.lock.acquire(LOCK_WAIT, LOCK_TTL).await;
        if token.is_none() {
            warn!("state lock unavailable, falling back to unlocked journal update");
        }
        let result = async {
            let mut doc = self.read().await;
            mutate(&mut doc);
            doc.updated_at = Some(Utc::now());
            self.write(&doc).await
        }
        .await;
        if let Some(token) = token {
            self.lock.release(&token).await;
        }
        result
    }

    pub async fn last_compacted_date(&self) -> Option<String> {
        self.read().await.last_compacted_date
    }

    pub async fn update_last_compacted_date(&self, date: &str) -> anyhow::Result<()> {
        self.update(|doc| doc.last_compacted_date = Some(date.to_string())).await?;
        info!(date, "updated last_compacted_date");
        Ok(())
    }

    pub async fn log_partition_status(&self, key: &PartitionKey, entry: PartitionEntry) -> anyhow::Result<()> {
        let canonical = key.canonical();
        self.update(|doc| {
            doc.partitions.insert(canonical.clone(), entry);
        })
        .await
    }

    pub async fn log_day_status(&self, date: &str, status: DayStatus) -> anyhow::Result<()> {
        let date = date.to_string();
        self.update(|doc| {
            doc.days.insert(
                date.clone(),
                DayEntry {
                    status,
                    updated_at: Utc::now(),
                },
            );
        })
        .await
    }

    pub async fn partition_entry(&self, key: &PartitionKey) -> Option<PartitionEntry> {
        self.read().await.partitions.get(&key.canonical()).cloned()
    }

    pub async fn day_entry(&self, date: &str) -> Option<DayEntry> {
        self.read().await.days.get(date).cloned()
    }

    pub async fn all_partitions(&self) -> HashMap<String, PartitionEntry> {
        self.read().await.partitions
    }

    pub async fn all_days(&self) -> HashMap<String, DayEntry> {
        self.read().await.days
    }

    /// Removes a single partition's journal entry, used by the `cleanup`
    /// runner mode when erasing a date range.
    pub async fn remove_partition(&self, key: &PartitionKey) -> anyhow::Result<()> {
        let canonical = key.canonical();
        self.update(|doc| {
            doc.partitions.remove(&canonical);
        })
        .await
    }

    /// Removes a single date's day-level journal entry.
    pub async fn remove_day(&self, date: &str) -> anyhow::Result<()> {
        let date = date.to_string();
        self.update(|doc| {
            doc.days.remove(&date);
        })
        .await
    }

    /// Sweeps `compacted/locks/` for locks whose partition is not actually
    /// `in_progress` per the journal, or whose `in_progress` entry has not
    /// been touched in over two hours, and removes them. Matches
    /// `cleanup_stale_locks` in the upstream planner: a lock surviving a
    /// crashed worker should never permanently block that partition.
    pub async fn cleanup_stale_locks(&self, target_date: Option<&str>) -> anyhow::Result<usize> {
        let token = self.lock.acquire(LOCK_WAIT, LOCK_TTL).await;
        let mut removed = 0usize;
        let result: anyhow::Result<()> = async {
            let mut doc = self.read().await;
            let locks = self.blob.list_keys_and_metadata("compacted/locks/").await?;
            let now = Utc::now();
            let mut changed = false;

            for lock in locks {
                let Some(rel) = lock
                    .key
                    .strip_prefix("compacted/locks/")
                    .and_then(|s| s.strip_suffix(".lock"))
                else {
                    continue;
                };
                let parts: Vec<&str> = rel.split('/').collect();
                if parts.len() != 4 {
                    continue;
                }
                let partition_date = parts[3];
                if let Some(target) = target_date {
                    if partition_date != target {
                        continue;
                    }
                }

                let entry = doc.partitions.get_mut(rel);
                let stale = match entry {
                    None => true,
                    Some(entry) if entry.status != PartitionStatus::InProgress => true,
                    Some(entry) => {
                        let age = now.signed_duration_since(entry.updated_at);
                        if age.to_std().unwrap_or_default() > STALE_PARTITION_TTL {
                            entry.status = PartitionStatus::Stalled;
                            entry.updated_at = now;
                            changed = true;
                            true
                        } else {
                            false
                        }
                    }
                };

                if stale {
                    warn!(lock_key = %lock.key, "removing stale partition lock");
                    self.blob.delete(&lock.key).await?;
                    removed += 1;
                }
            }

            if changed {
                self.write(&doc).await?;
            }
            Ok(())
        }
        .await;

        if let Some(token) = token {
            self.lock.release(&token).await;
        }
        result?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemBlob;
    use qlc_types::{CompactDate, PartitionStatus as PS};
    use std::str::FromStr;

    fn journal() -> StateJournal {
        StateJournal::new(Arc::new(MemBlob::new()))
    }

    fn key() -> PartitionKey {
        PartitionKey::new("binance", "trade", "BTCUSDT", CompactDate::from_str("20240102").unwrap())
    }

    #[tokio::test]
    async fn round_trips_last_compacted_date() {
        let journal = journal();
        assert_eq!(journal.last_compacted_date().await, None);
        journal.update_last_compacted_date("20240102").await.unwrap();
        assert_eq!(journal.last_compacted_date().await, Some("20240102".to_string()));
    }

    #[tokio::test]
    async fn logs_and_reads_partition_entry() {
        let journal = journal();
        let k = key();
        journal
            .log_partition_status(
                &k,
                PartitionEntry {
                    status: PS::Success,
                    day_quality_post: None,
                    post_filter_version: Some("1.0.0".to_string()),
                    rows: 42,
                    total_size_bytes: 1024,
                    updated_at: Utc::now(),
                    error_type: None,
                    failing_key: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        let entry = journal.partition_entry(&k).await.unwrap();
        assert_eq!(entry.status, PS::Success);
        assert_eq!(entry.rows, 42);
    }

    #[tokio::test]
    async fn stale_lock_cleanup_removes_orphaned_lock() {
        let blob = Arc::new(MemBlob::new());
        let journal = StateJournal::new(Arc::clone(&blob) as Arc<dyn Blob>);
        blob.set(
            "compacted/locks/binance/trade/BTCUSDT/20240102.lock",
            Bytes::from_static(b"{}"),
            SetPrecondition::None,
        )
        .await
        .unwrap();
        let removed = journal.cleanup_stale_locks(None).await.unwrap();
        assert_eq!(removed, 1);
    }
}
