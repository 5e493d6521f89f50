use std::collections::{BTreeSet, HashMap};

use qlc_types::journal::{DayStatus, PartitionStatus};
use qlc_types::PartitionKey;

/// A date is "completed" for backfill purposes if it has a terminal day
/// status or if every partition known for that date carries one of these
/// three statuses. Deliberately narrower than
/// `PartitionStatus::is_terminal` (which also counts `no_files`,
/// `download_failed` and `aborted` as terminal for retry-gating purposes):
/// `get_completed_dates` in the upstream planner only recognizes these
/// three as "this date is done, stop looking at it".
fn is_completed_partition_status(status: PartitionStatus) -> bool {
    matches!(
        status,
        PartitionStatus::Success | PartitionStatus::Quarantine | PartitionStatus::Skipped
    )
}

fn is_completed_day_status(status: DayStatus) -> bool {
    matches!(
        status,
        DayStatus::Success | DayStatus::Quarantine | DayStatus::Skipped
    )
}

/// Produces the ordered list of dates due for catch-up or reverse backfill,
/// spec.md §4.5. Dates are treated as opaque `YYYYMMDD` strings throughout —
/// `today` is injected by the caller (the runner), never computed here, per
/// spec.md §9 Open Question (b).
pub struct Planner<'a> {
    raw_dates: &'a BTreeSet<String>,
    days: &'a HashMap<String, DayStatus>,
    partitions: &'a HashMap<String, PartitionStatus>,
    today: &'a str,
}

impl<'a> Planner<'a> {
    pub fn new(
        raw_dates: &'a BTreeSet<String>,
        days: &'a HashMap<String, DayStatus>,
        partitions: &'a HashMap<String, PartitionStatus>,
        today: &'a str,
    ) -> Self {
        Planner {
            raw_dates,
            days,
            partitions,
            today,
        }
    }

    /// Dates considered "done": a terminal day-level status, or every known
    /// partition for that date carrying a terminal status.
    pub fn completed_dates(&self) -> BTreeSet<String> {
        let mut completed: BTreeSet<String> = self
            .days
            .iter()
            .filter(|(_, status)| is_completed_day_status(**status))
            .map(|(date, _)| date.clone())
            .collect();

        let mut by_date: HashMap<&str, Vec<PartitionStatus>> = HashMap::new();
        for (key, status) in self.partitions {
            let date = key.rsplit('/').next().unwrap_or(key);
            if completed.contains(date) {
                continue;
            }
            by_date.entry(date).or_default().push(*status);
        }

        for (date, statuses) in by_date {
            if statuses.iter().all(|s| is_completed_partition_status(*s)) {
                completed.insert(date.to_string());
            }
        }

        completed
    }

    /// Forward catch-up: all raw dates strictly between `last_compacted_date`
    /// and `today`, ascending. Empty if no date has ever been compacted — the
    /// runner treats that as a fresh start and elects "yesterday only"
    /// itself rather than asking the planner to guess a starting point.
    pub fn plan_catch_up(&self, last_compacted_date: Option<&str>) -> Vec<String> {
        let Some(last) = last_compacted_date else {
            return Vec::new();
        };
        self.raw_dates
            .iter()
            .filter(|d| d.as_str() > last && d.as_str() < self.today)
            .cloned()
            .collect()
    }

    /// Reverse backfill: raw dates before `today` that are not yet
    /// completed, descending.
    pub fn plan_reverse(&self) -> Vec<String> {
        let completed = self.completed_dates();
        let mut pending: Vec<String> = self
            .raw_dates
            .iter()
            .filter(|d| d.as_str() < self.today && !completed.contains(d.as_str()))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.cmp(a));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dates(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn catch_up_excludes_today_and_bounds_below_last() {
        let raw = dates(&["20240101", "20240102", "20240103"]);
        let days = HashMap::new();
        let partitions = HashMap::new();
        let planner = Planner::new(&raw, &days, &partitions, "20240103");
        assert_eq!(planner.plan_catch_up(Some("20240101")), vec!["20240102"]);
    }

    #[test]
    fn catch_up_with_no_prior_state_is_empty() {
        let raw = dates(&["20240101"]);
        let days = HashMap::new();
        let partitions = HashMap::new();
        let planner = Planner::new(&raw, &days, &partitions, "20240102");
        assert!(planner.plan_catch_up(None).is_empty());
    }

    #[test]
    fn reverse_backfill_stops_at_wall_when_all_completed() {
        let raw = dates(&["20240101", "20240102", "20240103"]);
        let mut days = HashMap::new();
        for d in ["20240101", "20240102", "20240103"] {
            days.insert(d.to_string(), DayStatus::Success);
        }
        let partitions = HashMap::new();
        let planner = Planner::new(&raw, &days, &partitions, "20240104");
        assert!(planner.plan_reverse().is_empty());
    }

    #[test]
    fn reverse_backfill_returns_pending_dates_descending() {
        let raw = dates(&["20240101", "20240102", "20240103"]);
        let mut days = HashMap::new();
        days.insert("20240101".to_string(), DayStatus::Success);
        let partitions = HashMap::new();
        let planner = Planner::new(&raw, &days, &partitions, "20240104");
        assert_eq!(
            planner.plan_reverse(),
            vec!["20240103".to_string(), "20240102".to_string()]
        );
    }

    #[test]
    fn date_completed_when_all_known_partitions_are_terminal() {
        let raw = dates(&["20240101"]);
        let days = HashMap::new();
        let mut partitions = HashMap::new();
        partitions.insert(
            "binance/trade/BTCUSDT/20240101".to_string(),
            PartitionStatus::Success,
        );
        partitions.insert(
            "binance/book/BTCUSDT/20240101".to_string(),
            PartitionStatus::Quarantine,
        );
        let planner = Planner::new(&raw, &days, &partitions, "20240102");
        assert!(planner.completed_dates().contains("20240101"));
        assert!(planner.plan_reverse().is_empty());
    }

    #[test]
    fn partition_key_round_trips_into_planner_inputs() {
        // sanity check that PartitionKey::canonical()'s trailing segment is
        // exactly what the planner splits on.
        let key = PartitionKey::parse_canonical("binance/trade/BTCUSDT/20240101").unwrap();
        assert_eq!(key.canonical().rsplit('/').next().unwrap(), "20240101");
    }
}
