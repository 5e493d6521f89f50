use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// A UTC calendar date in canonical `YYYYMMDD` form.
///
/// Dates are kept as opaque, lexicographically-ordered strings throughout
/// the planner and journal: `"20240102" < "20240103"` sorts the same as
/// calendar order, so no parsing is needed to compare, sort, or use dates as
/// journal map keys. Parsing only happens at the boundary (construction and
/// discovery).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompactDate(String);

impl CompactDate {
    /// Parses and validates a `YYYYMMDD` string.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypesError::InvalidDate(s.to_string()));
        }
        // Validate it's a real calendar date, not just 8 digits.
        NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| TypesError::InvalidDate(s.to_string()))?;
        Ok(CompactDate(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Today's date, UTC. Per the spec, "today" is computed once by the
    /// caller (the runner) and passed down as an opaque string everywhere
    /// else; the planner never calls this itself.
    pub fn today_utc() -> Self {
        CompactDate(Utc::now().format("%Y%m%d").to_string())
    }

    pub fn yesterday_utc() -> Self {
        let d = Utc::now() - Duration::days(1);
        CompactDate(d.format("%Y%m%d").to_string())
    }
}

impl FromStr for CompactDate {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompactDate::parse(s)
    }
}

impl fmt::Display for CompactDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CompactDate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_dates() {
        assert_eq!(CompactDate::parse("20240102").unwrap().as_str(), "20240102");
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(CompactDate::parse("2024-01-02").is_err());
        assert!(CompactDate::parse("202401").is_err());
        assert!(CompactDate::parse("20241332").is_err());
    }

    #[test]
    fn string_order_matches_calendar_order() {
        let a = CompactDate::parse("20240102").unwrap();
        let b = CompactDate::parse("20240110").unwrap();
        let c = CompactDate::parse("20240201").unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
