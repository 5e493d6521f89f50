use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::blob::{Blob, BlobError, BlobMetadata, SetPrecondition};

/// An in-memory [`Blob`], analogous to `PersistLocation::new_in_mem()` in the
/// persist client test harness. Backs every unit and integration test in this
/// workspace so they need no real S3 endpoint.
#[derive(Debug, Default)]
pub struct MemBlob {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemBlob {
    pub fn new() -> Self {
        MemBlob::default()
    }
}

#[async_trait]
impl Blob for MemBlob {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes, precondition: SetPrecondition) -> Result<(), BlobError> {
        let mut objects = self.objects.lock().unwrap();
        if precondition == SetPrecondition::IfNotExists && objects.contains_key(key) {
            return Err(BlobError::PreconditionFailed);
        }
        objects.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys_and_metadata(&self, key_prefix: &str) -> Result<Vec<BlobMetadata>, BlobError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .range(key_prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(key_prefix))
            .map(|(k, v)| BlobMetadata {
                key: k.clone(),
                size_bytes: v.len() as u64,
            })
            .collect())
    }

    async fn list_common_prefixes(&self, key_prefix: &str) -> Result<Vec<String>, BlobError> {
        let objects = self.objects.lock().unwrap();
        let mut prefixes = Vec::new();
        for key in objects
            .range(key_prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(key_prefix))
            .map(|(k, _)| k)
        {
            let rest = &key[key_prefix.len()..];
            if let Some(idx) = rest.find('/') {
                let prefix = format!("{}{}/", key_prefix, &rest[..idx]);
                if prefixes.last() != Some(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
        prefixes.dedup();
        Ok(prefixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_not_exists_rejects_second_writer() {
        let blob = MemBlob::new();
        blob.set("locks/a", Bytes::from_static(b"1"), SetPrecondition::IfNotExists)
            .await
            .unwrap();
        let err = blob
            .set("locks/a", Bytes::from_static(b"2"), SetPrecondition::IfNotExists)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::PreconditionFailed));
    }

    #[tokio::test]
    async fn list_common_prefixes_is_one_level_deep() {
        let blob = MemBlob::new();
        for key in [
            "exchange=binance/stream=trade/symbol=BTCUSDT/date=20240101/a.parquet",
            "exchange=binance/stream=trade/symbol=ETHUSDT/date=20240101/a.parquet",
            "exchange=binance/stream=book/symbol=BTCUSDT/date=20240101/a.parquet",
        ] {
            blob.set(key, Bytes::new(), SetPrecondition::None).await.unwrap();
        }
        let prefixes = blob
            .list_common_prefixes("exchange=binance/stream=trade/")
            .await
            .unwrap();
        assert_eq!(
            prefixes,
            vec![
                "exchange=binance/stream=trade/symbol=BTCUSDT/".to_string(),
                "exchange=binance/stream=trade/symbol=ETHUSDT/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn list_keys_and_metadata_filters_by_prefix() {
        let blob = MemBlob::new();
        blob.set("a/1", Bytes::from_static(b"xx"), SetPrecondition::None)
            .await
            .unwrap();
        blob.set("b/1", Bytes::from_static(b"x"), SetPrecondition::None)
            .await
            .unwrap();
        let listed = blob.list_keys_and_metadata("a/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "a/1");
        assert_eq!(listed[0].size_bytes, 2);
    }
}
