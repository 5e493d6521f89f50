use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::DayQuality;

/// The metadata sidecar written alongside a compacted partition's data file,
/// at `.../date=D/meta.json`, with two supplemental fields
/// (`compaction_version`, `created_at`) carried over from `merge_writer.py`'s
/// completion metadata for triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSidecar {
    pub rows: u64,
    pub ts_event_min: Option<i64>,
    pub ts_event_max: Option<i64>,
    pub sha256: String,
    pub source_files: usize,
    pub schema_version: u32,
    pub stream_type: String,
    pub ordering_columns: Vec<String>,
    pub day_quality: DayQuality,
    pub post_filter_version: String,
    #[serde(default)]
    pub compaction_version: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MetadataSidecar {
    pub fn ordering_columns_default() -> Vec<String> {
        vec!["ts_event".to_string(), "seq".to_string()]
    }
}
