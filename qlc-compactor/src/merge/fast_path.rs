use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow2::array::Int64Array;
use arrow2::io::parquet::read::{self, statistics::deserialize, FileReader};
use qlc_types::CompactorError;

use super::rowbuf::{flush, BufferedRow};
use super::schema::{schema_with_seq, ts_event_index};
use super::writer::OutputWriter;

/// Per-file `ts_event` min/max derived from parquet column statistics,
/// without decoding any row data.
#[derive(Debug, Clone, Copy)]
pub struct FileTsEventRange {
    pub min: i64,
    pub max: i64,
}

/// Reads `ts_event`'s column statistics for every row group in `path` and
/// returns the file-wide min/max, or `None` if the column is missing or any
/// row group lacks statistics.
pub fn file_ts_event_range(path: &Path) -> Result<Option<FileTsEventRange>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let metadata = read::read_metadata(&mut reader)?;
    let schema = read::infer_schema(&metadata)?;
    let Some(ts_idx) = ts_event_index(&schema) else {
        return Ok(None);
    };
    let field = &schema.fields[ts_idx];
    let Ok(stats) = deserialize(field, &metadata.row_groups) else {
        return Ok(None);
    };

    let Some(min_array) = stats.min_value.as_any().downcast_ref::<Int64Array>() else {
        return Ok(None);
    };
    let Some(max_array) = stats.max_value.as_any().downcast_ref::<Int64Array>() else {
        return Ok(None);
    };

    let min = min_array.iter().flatten().min().copied();
    let max = max_array.iter().flatten().max().copied();
    match (min, max) {
        (Some(min), Some(max)) => Ok(Some(FileTsEventRange { min, max })),
        _ => Ok(None),
    }
}

/// Why fast-concat is or is not applicable, surfaced for the one warn-level
/// log line the merger emits when it falls back to k-way.
#[derive(Debug, Clone)]
pub enum OrderingVerdict {
    Ordered,
    SingleFile,
    MissingStats(String),
    Overlap { min: i64, prev_max: i64, file: String },
}

impl OrderingVerdict {
    pub fn is_ordered(&self) -> bool {
        matches!(self, OrderingVerdict::Ordered | OrderingVerdict::SingleFile)
    }

    pub fn reason(&self) -> String {
        match self {
            OrderingVerdict::Ordered => "strictly_ordered".to_string(),
            OrderingVerdict::SingleFile => "single_file".to_string(),
            OrderingVerdict::MissingStats(file) => format!("missing_stats:{file}"),
            OrderingVerdict::Overlap { min, prev_max, file } => {
                format!("overlap:current_min({min}) < prev_max({prev_max}) at {file}")
            }
        }
    }
}

/// Checks whether `inputs` are strictly non-overlapping and ascending by
/// `ts_event`, spec.md §4.6 "Fast concat" precondition.
pub fn check_ordering(inputs: &[std::path::PathBuf]) -> Result<OrderingVerdict> {
    if inputs.len() <= 1 {
        return Ok(OrderingVerdict::SingleFile);
    }
    let mut prev_max = i64::MIN;
    for path in inputs {
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let Some(range) = file_ts_event_range(path)? else {
            return Ok(OrderingVerdict::MissingStats(file_name));
        };
        if range.min < prev_max {
            return Ok(OrderingVerdict::Overlap {
                min: range.min,
                prev_max,
                file: file_name,
            });
        }
        prev_max = range.max;
    }
    Ok(OrderingVerdict::Ordered)
}

pub struct FastConcatResult {
    pub rows: u64,
    pub ts_event_min: Option<i64>,
    pub ts_event_max: Option<i64>,
}

/// Streams every input's batches in file order and appends them to the
/// output writer through the same [`rowbuf`] buffer/flush machinery the
/// direct k-way path uses, flushing on the identical `output_buffer_size`
/// row boundary (rather than per input row-group). No cross-file comparison
/// is needed because `check_ordering` already proved the inputs are disjoint
/// and ascending, spec.md §4.6 "Fast concat"; sharing the flush boundary and
/// column-assembly code with k-way is what makes the two paths produce
/// byte-identical output for the same row sequence (spec.md §8 P5).
pub fn fast_concat(
    inputs: &[PathBuf],
    output_path: &Path,
    batch_size: usize,
    output_buffer_size: usize,
    add_seq_column: bool,
    check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
) -> Result<FastConcatResult> {
    let mut rows_written: u64 = 0;
    let mut ts_event_min: Option<i64> = None;
    let mut ts_event_max: Option<i64> = None;

    if inputs.is_empty() {
        return Ok(FastConcatResult {
            rows: 0,
            ts_event_min: None,
            ts_event_max: None,
        });
    }

    let first_file = File::open(&inputs[0]).with_context(|| format!("opening {}", inputs[0].display()))?;
    let mut first_reader = BufReader::new(first_file);
    let first_metadata = read::read_metadata(&mut first_reader)?;
    let base_schema = read::infer_schema(&first_metadata)?;
    let output_schema = if add_seq_column {
        schema_with_seq(&base_schema)
    } else {
        base_schema.clone()
    };
    let seq_idx = if add_seq_column {
        Some(ts_event_index(&output_schema).context("ts_event missing from fast-concat output schema")? + 1)
    } else {
        None
    };

    let mut writer = OutputWriter::create(output_path, output_schema.clone())?;
    let mut buffer: Vec<BufferedRow> = Vec::with_capacity(output_buffer_size);

    for path in inputs {
        if check_shutdown() {
            return Err(CompactorError::ShutdownRequested.into());
        }
        if let Some(range) = file_ts_event_range(path)? {
            ts_event_min = Some(ts_event_min.map_or(range.min, |m: i64| m.min(range.min)));
            ts_event_max = Some(ts_event_max.map_or(range.max, |m: i64| m.max(range.max)));
        }

        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let metadata = read::read_metadata(&mut reader)?;
        let schema = read::infer_schema(&metadata)?;
        let row_groups = metadata.row_groups.clone();
        let file_reader = FileReader::new(reader, row_groups, schema, Some(batch_size), None, None);

        for chunk in file_reader {
            let chunk = chunk.with_context(|| format!("reading batch from {}", path.display()))?;
            let chunk = Arc::new(chunk);
            for row_idx in 0..chunk.len() {
                buffer.push(BufferedRow {
                    chunk: Arc::clone(&chunk),
                    row_idx,
                });
                if buffer.len() >= output_buffer_size {
                    rows_written += flush(&mut buffer, &output_schema, seq_idx, rows_written, &mut writer)?;
                }
            }
        }
    }

    if !buffer.is_empty() {
        rows_written += flush(&mut buffer, &output_schema, seq_idx, rows_written, &mut writer)?;
    }

    writer.close()?;
    Ok(FastConcatResult {
        rows: rows_written,
        ts_event_min,
        ts_event_max,
    })
}
