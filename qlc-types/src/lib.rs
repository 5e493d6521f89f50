//! Shared types for the quantlab compaction engine: partition keys, dates,
//! the error taxonomy, quality reports, metadata sidecars and the state
//! journal document shape.

pub mod date;
pub mod error;
pub mod journal;
pub mod metadata;
pub mod partition;
pub mod quality;

pub use date::CompactDate;
pub use error::{CompactorError, ErrorKind, TypesError};
pub use journal::{DayEntry, DayStatus, JournalDocument, PartitionEntry, PartitionStatus};
pub use metadata::MetadataSidecar;
pub use partition::{PartitionKey, PartitionTriple};
pub use quality::{
    DayQuality, EpsStats, QualityDayReport, QualityDayStats, WindowAssessment, WindowQuality,
    WindowReport, WindowSignals, EXPECTED_WINDOWS_PER_DAY, POST_FILTER_VERSION,
};
