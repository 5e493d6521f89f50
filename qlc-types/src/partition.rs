use std::fmt;

use serde::{Deserialize, Serialize};

use crate::date::CompactDate;
use crate::error::TypesError;

/// Identifies one logical partition: `(exchange, stream, symbol, date)`.
///
/// The canonical string form (`exchange/stream/symbol/date`) is used as the
/// key into the state journal's `partitions` map and is stable across the
/// lifetime of a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub exchange: String,
    pub stream: String,
    pub symbol: String,
    pub date: CompactDate,
}

impl PartitionKey {
    pub fn new(
        exchange: impl Into<String>,
        stream: impl Into<String>,
        symbol: impl Into<String>,
        date: CompactDate,
    ) -> Self {
        PartitionKey {
            exchange: exchange.into(),
            stream: stream.into(),
            symbol: symbol.into(),
            date,
        }
    }

    /// Canonical `exchange/stream/symbol/date` string, as stored in the
    /// journal's `partitions` map.
    pub fn canonical(&self) -> String {
        format!("{}/{}/{}/{}", self.exchange, self.stream, self.symbol, self.date)
    }

    /// Parses a canonical `exchange/stream/symbol/date` string back into a
    /// key. Used by the planner when grouping journal entries by date (see
    /// `Planner::completed_dates`, which needs the trailing date segment).
    pub fn parse_canonical(s: &str) -> Result<Self, TypesError> {
        let parts: Vec<&str> = s.split('/').collect();
        let [exchange, stream, symbol, date] = parts[..] else {
            return Err(TypesError::InvalidPartitionKey(s.to_string()));
        };
        let date = CompactDate::parse(date).map_err(|_| TypesError::InvalidPartitionKey(s.to_string()))?;
        Ok(PartitionKey::new(exchange, stream, symbol, date))
    }

    /// The raw-store prefix under which this partition's input files live:
    /// `exchange=X/stream=Y/symbol=Z/date=D/`.
    pub fn raw_prefix(&self) -> String {
        format!(
            "exchange={}/stream={}/symbol={}/date={}/",
            self.exchange, self.stream, self.symbol, self.date
        )
    }

    /// The compact-store key for the merged data file.
    pub fn compact_data_key(&self) -> String {
        format!("{}data.parquet", self.raw_prefix())
    }

    /// The compact-store key for the metadata sidecar.
    pub fn compact_meta_key(&self) -> String {
        format!("{}meta.json", self.raw_prefix())
    }

    /// The compact-store key for the quality sidecar.
    pub fn compact_quality_key(&self) -> String {
        format!("{}quality_day.json", self.raw_prefix())
    }

    /// The per-partition lock object key.
    pub fn lock_key(&self) -> String {
        format!(
            "compacted/locks/{}/{}/{}/{}.lock",
            self.exchange, self.stream, self.symbol, self.date
        )
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// One discovered (exchange, stream, symbol) triple known present for some
/// date, as produced by `Discovery::discover_partitions_for_date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTriple {
    pub exchange: String,
    pub stream: String,
    pub symbol: String,
}

impl PartitionTriple {
    pub fn with_date(self, date: CompactDate) -> PartitionKey {
        PartitionKey::new(self.exchange, self.stream, self.symbol, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(date: &str) -> PartitionKey {
        PartitionKey::new("binance", "trade", "BTCUSDT", CompactDate::parse(date).unwrap())
    }

    #[test]
    fn canonical_round_trips() {
        let k = key("20240102");
        let s = k.canonical();
        assert_eq!(s, "binance/trade/BTCUSDT/20240102");
        assert_eq!(PartitionKey::parse_canonical(&s).unwrap(), k);
    }

    #[test]
    fn raw_prefix_matches_object_layout() {
        let k = key("20240102");
        assert_eq!(k.raw_prefix(), "exchange=binance/stream=trade/symbol=BTCUSDT/date=20240102/");
        assert_eq!(
            k.compact_data_key(),
            "exchange=binance/stream=trade/symbol=BTCUSDT/date=20240102/data.parquet"
        );
        assert_eq!(
            k.lock_key(),
            "compacted/locks/binance/trade/BTCUSDT/20240102.lock"
        );
    }
}
