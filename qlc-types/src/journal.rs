use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::quality::DayQuality;

/// Per-partition lifecycle status: absent -> in_progress (on lock) -> terminal.
///
/// `Locked` is not itself a terminal or journaled status — it is the
/// worker's in-memory result when a lock acquisition is refused by another
/// worker (benign, non-fatal); the journal entry for that partition is left
/// untouched. It's kept in this enum anyway so the worker has one type to
/// report its outcome with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    InProgress,
    Stalled,
    Success,
    Quarantine,
    Skipped,
    NoFiles,
    DownloadFailed,
    Aborted,
    Locked,
}

impl PartitionStatus {
    /// Terminal statuses: the partition will not be retried by the planner
    /// on a future run without an explicit retry directive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PartitionStatus::Success
                | PartitionStatus::Quarantine
                | PartitionStatus::Skipped
                | PartitionStatus::NoFiles
                | PartitionStatus::Aborted
                | PartitionStatus::DownloadFailed
        )
    }
}

/// Day-level status: `status ∈ {success, quarantine, skipped, in_progress,
/// stalled, aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Success,
    Quarantine,
    Skipped,
    InProgress,
    Stalled,
    Aborted,
}

impl DayStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DayStatus::Success | DayStatus::Quarantine | DayStatus::Skipped
        )
    }
}

/// One entry in `journal.partitions[key]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub status: PartitionStatus,
    #[serde(default)]
    pub day_quality_post: Option<DayQuality>,
    #[serde(default)]
    pub post_filter_version: Option<String>,
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub total_size_bytes: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry in `journal.days[date]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayEntry {
    pub status: DayStatus,
    pub updated_at: DateTime<Utc>,
}

/// The single state journal document at `compacted/_state.json`.
///
/// Invariant I6: partial writes never corrupt the JSON structure and lost
/// writes only delay progress. This type is the document's exact shape; the
/// read-modify-write cycle and locking live in `qlc-persist::journal`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_compacted_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub days: HashMap<String, DayEntry>,
    #[serde(default)]
    pub partitions: HashMap<String, PartitionEntry>,
}
