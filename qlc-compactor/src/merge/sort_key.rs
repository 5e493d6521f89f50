use std::cmp::Ordering;

/// The merge's total order, spec.md §3/§4.6: `(ts_event, file_idx, row_idx)`,
/// with `ts_event == None` sorted last and consistently so across both the
/// fast-path ordering check and the k-way heap (spec.md §4.6 "Numeric
/// semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub ts_event: Option<i64>,
    pub file_idx: usize,
    pub row_idx: u64,
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        ts_event_cmp(self.ts_event, other.ts_event)
            .then_with(|| self.file_idx.cmp(&other.file_idx))
            .then_with(|| self.row_idx.cmp(&other.row_idx))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn ts_event_cmp(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ts: Option<i64>, file_idx: usize, row_idx: u64) -> SortKey {
        SortKey {
            ts_event: ts,
            file_idx,
            row_idx,
        }
    }

    #[test]
    fn ties_break_on_file_idx_then_row_idx() {
        let mut keys = vec![
            key(Some(200), 2, 0),
            key(Some(200), 1, 0),
            key(Some(100), 0, 0),
        ];
        keys.sort();
        assert_eq!(keys, vec![key(Some(100), 0, 0), key(Some(200), 1, 0), key(Some(200), 2, 0)]);
    }

    #[test]
    fn null_ts_event_sorts_last() {
        let mut keys = vec![key(None, 0, 0), key(Some(5), 1, 0)];
        keys.sort();
        assert_eq!(keys, vec![key(Some(5), 1, 0), key(None, 0, 0)]);
    }
}
