//! Object-store abstraction, distributed locking, discovery and the state
//! journal: the persistence layer the compaction engine is built on.

pub mod blob;
pub mod discovery;
pub mod journal_store;
pub mod lock;
pub mod mem;
pub mod s3_blob;

pub use blob::{Blob, BlobError, BlobMetadata, SetPrecondition};
pub use discovery::Discovery;
pub use journal_store::{StateJournal, STATE_FILE_KEY};
pub use lock::{DocumentLock, PartitionLockManager, PARTITION_LOCK_VERSION};
pub use mem::MemBlob;
pub use s3_blob::S3Blob;
