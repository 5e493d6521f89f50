use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors a [`Blob`] implementation can raise. Transient network/throttling
/// failures are retried inside the implementation (see `s3_blob::with_retry`)
/// and never surface here; everything that does reach a caller is something
/// the compaction pipeline must act on.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object store request failed: {0}")]
    Io(#[from] anyhow::Error),

    /// Returned by `set` with [`SetPrecondition::IfNotExists`] when the key
    /// already exists. This is the expected, benign outcome of losing a lock
    /// race and callers should treat it as such, not as an error to log.
    #[error("precondition failed: key already exists")]
    PreconditionFailed,
}

/// How a `set` should behave if the key already has a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPrecondition {
    /// Overwrite unconditionally.
    None,
    /// Equivalent to an S3 `PUT` with `If-None-Match: *`. Used for both the
    /// journal document lock and per-partition locks, where exactly one
    /// writer must win a race to create the object.
    IfNotExists,
}

/// One entry returned by a prefix listing.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub key: String,
    pub size_bytes: u64,
}

/// Object-store abstraction the compaction engine is written against.
///
/// Mirrors the shape of `mz_persist::location::Blob`: a small get/set/delete
/// surface plus a prefix listing, kept deliberately narrow so that an
/// in-memory implementation ([`crate::mem::MemBlob`]) is trivial to write for
/// tests and an S3-backed implementation ([`crate::s3_blob::S3Blob`]) can be
/// swapped in without touching any call site.
#[async_trait]
pub trait Blob: std::fmt::Debug + Send + Sync {
    /// Returns the current value of `key`, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError>;

    /// Writes `value` to `key`. Under [`SetPrecondition::IfNotExists`], fails
    /// with [`BlobError::PreconditionFailed`] if the key already exists; the
    /// store must guarantee this check-and-set is atomic with respect to
    /// other writers, which is what makes lock objects safe to race on.
    async fn set(&self, key: &str, value: Bytes, precondition: SetPrecondition) -> Result<(), BlobError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Lists every key under `key_prefix`, recursively, with size metadata.
    /// Used by the partition worker to enumerate raw source files once a
    /// partition prefix is known.
    async fn list_keys_and_metadata(&self, key_prefix: &str) -> Result<Vec<BlobMetadata>, BlobError>;

    /// Lists the immediate child "directories" under `key_prefix` using `/`
    /// as a delimiter, the way an S3 `ListObjectsV2` call with `Delimiter=/`
    /// returns `CommonPrefixes` instead of every object. Used by discovery to
    /// walk `exchange=*/stream=*/symbol=*/date=*/` one level at a time
    /// without paying to list every raw file underneath.
    async fn list_common_prefixes(&self, key_prefix: &str) -> Result<Vec<String>, BlobError>;
}
