use qlc_types::quality::{
    DayQuality, QualityDayReport, QualityDayStats, WindowAssessment, WindowQuality, WindowReport,
    POST_FILTER_VERSION,
};
use tracing::warn;

/// Implements the post-filter rules: per-window classification, the
/// BAD→DEGRADED downgrade and DEGRADED→GOOD override, then day-level
/// aggregation. Stateless; every method takes its inputs by reference and
/// returns a fresh report.
pub struct QualityEvaluator;

impl QualityEvaluator {
    /// Classifies one window report against the post-filter rules: HARD-BAD
    /// checks first, then DEGRADED checks, then the two override passes.
    pub fn assess_window(report: &WindowReport) -> WindowAssessment {
        let signals = &report.signals;
        let mut reasons = Vec::new();

        let dropped_events = signals.dropped_events;
        let queue_pct_peak = signals.queue_pct_peak;
        let reconnects = signals.reconnects;
        let drain_mode_accelerated_seconds = signals.drain_mode_accelerated_seconds;

        let binance_offline = *signals.offline_seconds_by_exchange.get("binance").unwrap_or(&0);
        let max_offline = signals
            .offline_seconds_by_exchange
            .values()
            .copied()
            .max()
            .unwrap_or(0);
        let binance_eps_min = signals
            .eps_by_exchange
            .get("binance")
            .and_then(|stats| stats.min);

        let mut quality = WindowQuality::Good;

        let mut is_hard_bad = false;
        if dropped_events > 0 {
            is_hard_bad = true;
            reasons.push(format!("dropped_events={dropped_events}"));
        }
        if queue_pct_peak >= 90.0 {
            is_hard_bad = true;
            reasons.push(format!("queue_pct_peak={queue_pct_peak}"));
        }
        if binance_offline > 600 {
            is_hard_bad = true;
            reasons.push(format!("binance_offline={binance_offline}"));
        }

        if is_hard_bad {
            quality = WindowQuality::Bad;
        } else {
            let mut is_degraded = false;
            if max_offline > 180 {
                is_degraded = true;
                reasons.push(format!("max_offline={max_offline}"));
            }
            if drain_mode_accelerated_seconds > 180 {
                is_degraded = true;
                reasons.push(format!(
                    "drain_mode_acc={drain_mode_accelerated_seconds}"
                ));
            }
            if reconnects >= 5 {
                is_degraded = true;
                reasons.push(format!("reconnects={reconnects}"));
            }
            if is_degraded {
                quality = WindowQuality::Degraded;
            }
        }

        // Fires even when the BAD trigger was binance_offline > 600, which
        // can't satisfy max_offline < 300 at the same time. Kept as
        // `quality_filter.py` has it, flagged here rather than silently
        // applied.
        if quality == WindowQuality::Bad
            && dropped_events == 0
            && max_offline < 300
            && queue_pct_peak < 90.0
        {
            if binance_offline > 600 {
                warn!(
                    binance_offline,
                    max_offline, "BAD->DEGRADED downgrade fired on a contradictory trigger"
                );
            }
            quality = WindowQuality::Degraded;
            reasons.push("Downgraded from BAD to DEGRADED (Safe checks)".to_string());
        }

        if quality == WindowQuality::Degraded
            && binance_offline == 0
            && dropped_events == 0
            && queue_pct_peak < 50.0
        {
            if binance_eps_min.is_some_and(|min| min > 100.0) {
                quality = WindowQuality::Good;
                reasons.push("Override: Binance Healthy -> GOOD".to_string());
            }
        }

        WindowAssessment {
            window_start: report.window_start.clone(),
            original_quality: report.quality.clone(),
            post_quality: quality,
            is_partial: report.is_partial,
            reasons,
            binance_offline,
            dropped_events,
        }
    }

    /// Aggregates per-window assessments into the day-level verdict, exactly
    /// as `quality_filter.py`'s `aggregate_day`: PARTIAL windows are excluded
    /// from the BAD/DEGRADED/GOOD vote but still counted, and a day with too
    /// few non-partial windows is itself PARTIAL regardless of the vote.
    pub fn aggregate_day(windows: Vec<WindowAssessment>) -> QualityDayReport {
        let total_windows = windows.len();
        let active: Vec<&WindowAssessment> = windows.iter().filter(|w| !w.is_partial).collect();
        let partial_count = windows.iter().filter(|w| w.is_partial).count();

        let bad = active
            .iter()
            .filter(|w| w.post_quality == WindowQuality::Bad)
            .count();
        let degraded = active
            .iter()
            .filter(|w| w.post_quality == WindowQuality::Degraded)
            .count();
        let good = active
            .iter()
            .filter(|w| w.post_quality == WindowQuality::Good)
            .count();

        let total_drops: i64 = windows.iter().map(|w| w.dropped_events).sum();
        let binance_offline_total: i64 = windows.iter().map(|w| w.binance_offline).sum();

        let mut day_quality = DayQuality::Good;
        if bad >= 3 || total_drops > 100_000 || binance_offline_total > 3600 {
            day_quality = DayQuality::Bad;
        } else if (1..=2).contains(&bad) || degraded >= 10 || binance_offline_total > 900 {
            day_quality = DayQuality::Degraded;
        }

        if partial_count > 0 && active.len() < 80 {
            day_quality = DayQuality::Partial;
        }

        QualityDayReport {
            day_quality,
            version: POST_FILTER_VERSION.to_string(),
            stats: QualityDayStats {
                total_windows,
                good,
                degraded,
                bad,
                partial: partial_count,
                total_drops,
                binance_offline_total,
            },
            windows,
        }
    }

    /// Convenience wrapper: assesses every raw window report and aggregates
    /// the result in one call, skipping entries that failed to parse
    /// upstream (the caller is expected to have already logged those).
    pub fn evaluate(reports: &[WindowReport]) -> QualityDayReport {
        let assessed = reports.iter().map(Self::assess_window).collect();
        Self::aggregate_day(assessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use qlc_types::quality::{EpsStats, WindowSignals};

    fn report(dropped: i64, queue_pct: f64, binance_offline: i64) -> WindowReport {
        let mut offline = HashMap::new();
        offline.insert("binance".to_string(), binance_offline);
        WindowReport {
            window_start: Some("2024-01-02T00:00:00Z".to_string()),
            quality: Some("GOOD".to_string()),
            is_partial: false,
            signals: WindowSignals {
                dropped_events: dropped,
                queue_pct_peak: queue_pct,
                offline_seconds_by_exchange: offline,
                ..Default::default()
            },
        }
    }

    #[test]
    fn dropped_events_makes_window_bad() {
        let assessment = QualityEvaluator::assess_window(&report(5, 0.0, 0));
        assert_eq!(assessment.post_quality, WindowQuality::Bad);
    }

    #[test]
    fn contradictory_bad_trigger_does_not_downgrade() {
        // binance_offline=601 triggers BAD, but also satisfies max_offline<300
        // is false (601 !< 300) -- so this should stay BAD, not downgrade.
        let assessment = QualityEvaluator::assess_window(&report(0, 0.0, 601));
        assert_eq!(assessment.post_quality, WindowQuality::Bad);
    }

    #[test]
    fn low_queue_pct_bad_without_offline_downgrades() {
        // A BAD window purely from queue_pct_peak with no offline seconds
        // satisfies all three downgrade conditions and becomes DEGRADED.
        let assessment = QualityEvaluator::assess_window(&report(0, 95.0, 0));
        assert_eq!(assessment.post_quality, WindowQuality::Degraded);
    }

    #[test]
    fn healthy_binance_overrides_degraded_to_good() {
        let mut r = report(0, 10.0, 0);
        r.signals.reconnects = 5; // triggers DEGRADED
        r.signals.eps_by_exchange.insert(
            "binance".to_string(),
            EpsStats {
                min: Some(150.0),
                max: None,
                mean: None,
            },
        );
        let assessment = QualityEvaluator::assess_window(&r);
        assert_eq!(assessment.post_quality, WindowQuality::Good);
    }

    #[test]
    fn day_is_bad_with_three_bad_windows() {
        let windows: Vec<_> = (0..3).map(|_| report(5, 0.0, 0)).collect();
        let report = QualityEvaluator::evaluate(&windows);
        assert_eq!(report.day_quality, DayQuality::Bad);
        assert_eq!(report.stats.bad, 3);
    }

    #[test]
    fn day_is_partial_with_too_few_active_windows() {
        let mut windows: Vec<_> = (0..10).map(|_| report(0, 0.0, 0)).collect();
        let mut partial = report(0, 0.0, 0);
        partial.is_partial = true;
        windows.push(partial);
        let report = QualityEvaluator::evaluate(&windows);
        assert_eq!(report.day_quality, DayQuality::Partial);
    }

    #[test]
    fn day_is_good_with_no_issues() {
        let windows: Vec<_> = (0..96).map(|_| report(0, 0.0, 0)).collect();
        let report = QualityEvaluator::evaluate(&windows);
        assert_eq!(report.day_quality, DayQuality::Good);
        assert_eq!(report.stats.total_windows, 96);
    }
}
