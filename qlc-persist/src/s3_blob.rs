use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use rand::Rng;
use tracing::{debug, warn};

use crate::blob::{Blob, BlobError, BlobMetadata, SetPrecondition};

/// Maximum number of attempts for a single S3 call before giving up and
/// surfacing the error to the caller. Matches `MAX_RETRIES` in the upstream
/// ingester's own S3 client wrapper.
const MAX_ATTEMPTS: u32 = 5;

/// An S3-backed (or S3-compatible, e.g. MinIO) [`Blob`]. Transient failures
/// (throttling, connection resets, 5xx) are retried with jittered exponential
/// backoff inside `with_retry`; everything else is classified immediately.
#[derive(Debug, Clone)]
pub struct S3Blob {
    client: Client,
    bucket: String,
}

impl S3Blob {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        S3Blob {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the ambient AWS config, pointed at `endpoint` if
    /// one is given (for S3-compatible stores), matching the
    /// `S3_ENDPOINT`/`S3_ACCESS_KEY`/`S3_SECRET_KEY` environment layout the
    /// runner reads at startup.
    pub async fn connect(
        endpoint: Option<&str>,
        bucket: impl Into<String>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "qlc-static",
            ));
        }
        let config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&config).force_path_style(true);
        if let Some(endpoint) = endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }
        let client = Client::from_conf(s3_config.build());
        Ok(S3Blob::new(client, bucket))
    }
}

/// Retries `f` with jittered exponential backoff, doubling from 200ms up to a
/// 5s cap. Used for every S3 call except conditional `PUT`, whose failure
/// mode (precondition rejected) is meaningful and must not be retried away.
async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut delay = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= MAX_ATTEMPTS => {
                return Err(err).context(format!("{op} failed after {attempt} attempts"))
            }
            Err(err) => {
                let jitter = rand::thread_rng().gen_range(0..100);
                warn!(op, attempt, %err, "transient object store error, retrying");
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
        }
    }
}

#[async_trait]
impl Blob for S3Blob {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        let result = with_retry("get_object", || async {
            match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => {
                    let bytes = output
                        .body
                        .collect()
                        .await
                        .context("reading get_object body")?
                        .into_bytes();
                    Ok(Some(bytes))
                }
                Err(SdkError::ServiceError(e)) if e.err().is_no_such_key() => Ok(None),
                Err(err) => Err(anyhow!(err)).context("get_object"),
            }
        })
        .await?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: Bytes, precondition: SetPrecondition) -> Result<(), BlobError> {
        if precondition == SetPrecondition::IfNotExists {
            let request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .if_none_match("*")
                .body(ByteStream::from(value));
            return match request.send().await {
                Ok(_) => Ok(()),
                Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 412 => {
                    Err(BlobError::PreconditionFailed)
                }
                Err(err) => Err(BlobError::Io(anyhow!(err).context("put_object if-none-match"))),
            };
        }
        with_retry("put_object", || async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(value.clone()))
                .send()
                .await
                .context("put_object")?;
            Ok(())
        })
        .await
        .map_err(BlobError::Io)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        with_retry("delete_object", || async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context("delete_object")?;
            Ok(())
        })
        .await
        .map_err(BlobError::Io)
    }

    async fn list_keys_and_metadata(&self, key_prefix: &str) -> Result<Vec<BlobMetadata>, BlobError> {
        let mut out = Vec::new();
        let mut continuation_token = None;
        loop {
            let prefix = key_prefix.to_string();
            let token = continuation_token.clone();
            let page = with_retry("list_objects_v2", || async {
                let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(&prefix);
                if let Some(token) = &token {
                    request = request.continuation_token(token);
                }
                request.send().await.context("list_objects_v2")
            })
            .await
            .map_err(BlobError::Io)?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    out.push(BlobMetadata {
                        key: key.to_string(),
                        size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }
            if page.is_truncated().unwrap_or(false) {
                continuation_token = page.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        debug!(key_prefix, found = out.len(), "listed raw files");
        Ok(out)
    }

    async fn list_common_prefixes(&self, key_prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut out = Vec::new();
        let mut continuation_token = None;
        loop {
            let prefix = key_prefix.to_string();
            let token = continuation_token.clone();
            let page = with_retry("list_objects_v2_delimited", || async {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .delimiter("/");
                if let Some(token) = &token {
                    request = request.continuation_token(token);
                }
                request.send().await.context("list_objects_v2 with delimiter")
            })
            .await
            .map_err(BlobError::Io)?;

            for common in page.common_prefixes() {
                if let Some(prefix) = common.prefix() {
                    out.push(prefix.to_string());
                }
            }
            if page.is_truncated().unwrap_or(false) {
                continuation_token = page.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(out)
    }
}
