use std::collections::BTreeSet;
use std::sync::Arc;

use qlc_types::partition::PartitionTriple;
use tracing::debug;

use crate::blob::Blob;

/// Walks the raw object store's `exchange=X/stream=Y/symbol=Z/date=D/`
/// layout one delimited level at a time. Every listing call
/// goes through `Blob::list_common_prefixes`, which is expected to paginate
/// internally, so a store with many exchanges/streams/symbols never forces a
/// single unbounded `LIST` of every raw object.
pub struct Discovery {
    blob: Arc<dyn Blob>,
}

impl Discovery {
    pub fn new(blob: Arc<dyn Blob>) -> Self {
        Discovery { blob }
    }

    /// Returns every well-formed `YYYYMMDD` date value found anywhere in the
    /// raw store, across all exchanges, streams and symbols.
    pub async fn discover_dates(&self) -> anyhow::Result<BTreeSet<String>> {
        let mut dates = BTreeSet::new();
        for exchange_prefix in self.blob.list_common_prefixes("").await? {
            for stream_prefix in self.blob.list_common_prefixes(&exchange_prefix).await? {
                for symbol_prefix in self.blob.list_common_prefixes(&stream_prefix).await? {
                    for date_prefix in self.blob.list_common_prefixes(&symbol_prefix).await? {
                        if let Some(date) = parse_date_component(&date_prefix) {
                            dates.insert(date);
                        }
                    }
                }
            }
        }
        debug!(count = dates.len(), "discovered dates");
        Ok(dates)
    }

    /// Returns every (exchange, stream, symbol) triple whose `date=D/`
    /// prefix exists and contains at least one object.
    pub async fn discover_partitions_for_date(&self, date: &str) -> anyhow::Result<Vec<PartitionTriple>> {
        let mut triples = Vec::new();
        for exchange_prefix in self.blob.list_common_prefixes("").await? {
            let Some(exchange) = strip_component(&exchange_prefix, "exchange=") else {
                continue;
            };
            for stream_prefix in self.blob.list_common_prefixes(&exchange_prefix).await? {
                let Some(stream) = strip_component(&stream_prefix, "stream=") else {
                    continue;
                };
                for symbol_prefix in self.blob.list_common_prefixes(&stream_prefix).await? {
                    let Some(symbol) = strip_component(&symbol_prefix, "symbol=") else {
                        continue;
                    };
                    let date_prefix = format!("{symbol_prefix}date={date}/");
                    let objects = self.blob.list_keys_and_metadata(&date_prefix).await?;
                    if !objects.is_empty() {
                        triples.push(PartitionTriple {
                            exchange: exchange.clone(),
                            stream: stream.clone(),
                            symbol: symbol.clone(),
                        });
                    }
                }
            }
        }
        debug!(date, count = triples.len(), "discovered partitions for date");
        Ok(triples)
    }
}

fn strip_component(prefix: &str, marker: &str) -> Option<String> {
    let trimmed = prefix.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    segment.strip_prefix(marker).map(str::to_string)
}

fn parse_date_component(prefix: &str) -> Option<String> {
    let date = strip_component(prefix, "date=")?;
    if date.len() == 8 && date.chars().all(|c| c.is_ascii_digit()) {
        Some(date)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemBlob;
    use crate::blob::SetPrecondition;
    use bytes::Bytes;

    async fn seeded_blob() -> Arc<dyn Blob> {
        let blob: Arc<dyn Blob> = Arc::new(MemBlob::new());
        for key in [
            "exchange=binance/stream=trade/symbol=BTCUSDT/date=20240101/a.parquet",
            "exchange=binance/stream=trade/symbol=BTCUSDT/date=20240102/a.parquet",
            "exchange=binance/stream=book/symbol=ETHUSDT/date=20240101/a.parquet",
            "exchange=okx/stream=trade/symbol=BTCUSDT/date=20240101/a.parquet",
        ] {
            blob.set(key, Bytes::new(), SetPrecondition::None).await.unwrap();
        }
        blob
    }

    #[tokio::test]
    async fn discovers_all_dates_across_the_tree() {
        let discovery = Discovery::new(seeded_blob().await);
        let dates = discovery.discover_dates().await.unwrap();
        assert_eq!(dates, ["20240101", "20240102"].into_iter().map(String::from).collect());
    }

    #[tokio::test]
    async fn discovers_partitions_present_on_a_date() {
        let discovery = Discovery::new(seeded_blob().await);
        let triples = discovery.discover_partitions_for_date("20240101").await.unwrap();
        assert_eq!(triples.len(), 3);
        assert!(triples.iter().any(|t| t.exchange == "okx" && t.symbol == "BTCUSDT"));
    }

    #[tokio::test]
    async fn empty_date_prefix_yields_no_partitions() {
        let discovery = Discovery::new(seeded_blob().await);
        let triples = discovery.discover_partitions_for_date("20240103").await.unwrap();
        assert!(triples.is_empty());
    }
}
