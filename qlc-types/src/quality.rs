use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Version string stamped on every quality report, matching
/// `quality_filter.py`'s `POST_FILTER_VERSION`.
pub const POST_FILTER_VERSION: &str = "1.0.0";

/// Expected window count per day (96 windows of 15 minutes each).
pub const EXPECTED_WINDOWS_PER_DAY: usize = 96;

/// The day-level quality verdict, §4.1/§4.5 of the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayQuality {
    Good,
    Degraded,
    Bad,
    Partial,
    Unknown,
}

impl DayQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayQuality::Good => "GOOD",
            DayQuality::Degraded => "DEGRADED",
            DayQuality::Bad => "BAD",
            DayQuality::Partial => "PARTIAL",
            DayQuality::Unknown => "UNKNOWN",
        }
    }
}

impl Default for DayQuality {
    fn default() -> Self {
        DayQuality::Unknown
    }
}

/// The per-window classification produced by `assess_window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowQuality {
    Good,
    Degraded,
    Bad,
}

/// Latency-style min/max/mean bundle used for per-exchange events-per-second
/// signals. Only `min` is consulted by the post-filter rules, but the other
/// fields are carried through from the raw window report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpsStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

/// The raw `signals` bag inside a window quality report, as written by the
/// upstream ingester.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowSignals {
    #[serde(default)]
    pub dropped_events: i64,
    #[serde(default)]
    pub queue_pct_peak: f64,
    #[serde(default)]
    pub reconnects: i64,
    #[serde(default)]
    pub drain_mode_accelerated_seconds: i64,
    #[serde(default)]
    pub offline_seconds_by_exchange: HashMap<String, i64>,
    #[serde(default)]
    pub eps_by_exchange: HashMap<String, EpsStats>,
}

/// One window-level quality report as produced by the upstream ingester
/// under `quality/date=D/<window>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowReport {
    pub window_start: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub signals: WindowSignals,
}

/// The result of assessing one window against the post-filter rules
/// (`QualityEvaluator::assess_window`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowAssessment {
    pub window_start: Option<String>,
    pub original_quality: Option<String>,
    pub post_quality: WindowQuality,
    pub is_partial: bool,
    pub reasons: Vec<String>,
    pub binance_offline: i64,
    pub dropped_events: i64,
}

/// Aggregate counts behind a day verdict, surfaced for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityDayStats {
    pub total_windows: usize,
    pub good: usize,
    pub degraded: usize,
    pub bad: usize,
    pub partial: usize,
    pub total_drops: i64,
    pub binance_offline_total: i64,
}

/// The full day-level quality sidecar, written to
/// `.../date=D/quality_day.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityDayReport {
    pub day_quality: DayQuality,
    pub version: String,
    pub stats: QualityDayStats,
    pub windows: Vec<WindowAssessment>,
}

impl QualityDayReport {
    pub fn empty() -> Self {
        QualityDayReport {
            day_quality: DayQuality::Unknown,
            version: POST_FILTER_VERSION.to_string(),
            stats: QualityDayStats::default(),
            windows: Vec::new(),
        }
    }
}
