use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use qlc_types::CompactorError;

use super::file_stream::FileStream;
use super::rowbuf::{flush, BufferedRow};
use super::schema::{schema_with_seq, ts_event_index, SEQ_COLUMN};
use super::sort_key::SortKey;
use super::writer::OutputWriter;

pub struct KWayMergeResult {
    pub rows: u64,
    pub ts_event_min: Option<i64>,
    pub ts_event_max: Option<i64>,
}

/// Standard k-way merge, spec.md §4.6 "Direct k-way": a min-heap over one
/// entry per non-empty `FileStream`, popping the global minimum each
/// iteration and flushing a columnar output buffer every `output_buffer_size`
/// rows.
pub struct KWayMerger {
    streams: Vec<FileStream>,
    output_buffer_size: usize,
    add_seq_column: bool,
    check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl KWayMerger {
    pub fn new(
        inputs: &[PathBuf],
        batch_size: usize,
        output_buffer_size: usize,
        add_seq_column: bool,
        decode_dictionaries: bool,
        check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Result<Self> {
        let streams = inputs
            .iter()
            .enumerate()
            .map(|(idx, path)| FileStream::open(idx, path, batch_size, decode_dictionaries))
            .collect::<Result<Vec<_>>>()?;
        Ok(KWayMerger {
            streams,
            output_buffer_size,
            add_seq_column,
            check_shutdown,
        })
    }

    pub fn run(mut self, output_path: &Path) -> Result<KWayMergeResult> {
        if self.streams.is_empty() {
            return Ok(KWayMergeResult {
                rows: 0,
                ts_event_min: None,
                ts_event_max: None,
            });
        }

        let base_schema = self.streams[0].schema.clone();
        let output_schema = if self.add_seq_column {
            schema_with_seq(&base_schema)
        } else {
            base_schema.clone()
        };
        let seq_idx = if self.add_seq_column {
            Some(ts_event_index(&output_schema).unwrap() + 1)
        } else {
            None
        };

        let mut heap: BinaryHeap<Reverse<(SortKey, usize)>> = BinaryHeap::new();
        for (idx, stream) in self.streams.iter().enumerate() {
            if let Some(key) = stream.peek_sort_key() {
                heap.push(Reverse((key, idx)));
            }
        }

        let mut writer = OutputWriter::create(output_path, output_schema.clone())?;
        let mut buffer: Vec<BufferedRow> = Vec::with_capacity(self.output_buffer_size);
        let mut rows_written: u64 = 0;
        let mut ts_event_min: Option<i64> = None;
        let mut ts_event_max: Option<i64> = None;

        while let Some(Reverse((key, stream_idx))) = heap.pop() {
            if (self.check_shutdown)() {
                return Err(CompactorError::ShutdownRequested.into());
            }

            if let Some(ts) = key.ts_event {
                ts_event_min = Some(ts_event_min.map_or(ts, |m: i64| m.min(ts)));
                ts_event_max = Some(ts_event_max.map_or(ts, |m: i64| m.max(ts)));
            }

            let stream = &mut self.streams[stream_idx];
            let (chunk, row_idx) = stream
                .current_row()
                .expect("heap entry implies a current row exists");
            buffer.push(BufferedRow { chunk, row_idx });

            stream.advance()?;
            if let Some(next_key) = stream.peek_sort_key() {
                heap.push(Reverse((next_key, stream_idx)));
            }

            if buffer.len() >= self.output_buffer_size {
                rows_written += flush(&mut buffer, &output_schema, seq_idx, rows_written, &mut writer)?;
            }
        }

        if !buffer.is_empty() {
            rows_written += flush(&mut buffer, &output_schema, seq_idx, rows_written, &mut writer)?;
        }

        writer.close()?;
        Ok(KWayMergeResult {
            rows: rows_written,
            ts_event_min,
            ts_event_max,
        })
    }
}
