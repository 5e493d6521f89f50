use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow2::array::Array;
use arrow2::chunk::Chunk;
use arrow2::compute::cast::{cast, CastOptions};
use arrow2::datatypes::{DataType, Schema};
use arrow2::io::parquet::read::{self, FileReader};

use super::schema::{decoded_schema, ts_event_index};
use super::sort_key::SortKey;

/// Streams one parquet file a batch at a time, holding at most one decoded
/// [`Chunk`] in memory, spec.md §4.6 "Direct k-way": "Each input becomes a
/// FileStream holding exactly one decoded batch plus its current intra-batch
/// index."
pub struct FileStream {
    pub file_idx: usize,
    pub path: PathBuf,
    pub schema: Schema,
    reader: FileReader<BufReader<File>>,
    decode_dictionaries: bool,
    current_chunk: Option<Arc<Chunk<Box<dyn Array>>>>,
    batch_row_idx: usize,
    global_row_idx: u64,
    ts_event_col: usize,
}

impl FileStream {
    pub fn open(
        file_idx: usize,
        path: &Path,
        batch_size: usize,
        decode_dictionaries: bool,
    ) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let metadata = read::read_metadata(&mut reader)
            .with_context(|| format!("reading parquet metadata for {}", path.display()))?;
        let raw_schema = read::infer_schema(&metadata)
            .with_context(|| format!("inferring schema for {}", path.display()))?;
        let schema = if decode_dictionaries {
            decoded_schema(&raw_schema)
        } else {
            raw_schema.clone()
        };
        let ts_event_col = ts_event_index(&schema)
            .with_context(|| format!("{} has no ts_event column", path.display()))?;

        let row_groups = metadata.row_groups.clone();
        let file_reader = FileReader::new(reader, row_groups, raw_schema, Some(batch_size), None, None);

        let mut stream = FileStream {
            file_idx,
            path: path.to_path_buf(),
            schema,
            reader: file_reader,
            decode_dictionaries,
            current_chunk: None,
            batch_row_idx: 0,
            global_row_idx: 0,
            ts_event_col,
        };
        stream.load_next_chunk()?;
        Ok(stream)
    }

    fn load_next_chunk(&mut self) -> Result<()> {
        match self.reader.next() {
            Some(chunk) => {
                let chunk = chunk.with_context(|| format!("reading batch from {}", self.path.display()))?;
                let chunk = if self.decode_dictionaries {
                    decode_chunk(&chunk)?
                } else {
                    chunk
                };
                self.current_chunk = Some(Arc::new(chunk));
                self.batch_row_idx = 0;
            }
            None => self.current_chunk = None,
        }
        Ok(())
    }

    pub fn has_rows(&self) -> bool {
        self.current_chunk.is_some()
    }

    /// The sort key of the current row, or `None` once exhausted.
    pub fn peek_sort_key(&self) -> Option<SortKey> {
        let chunk = self.current_chunk.as_ref()?;
        let ts_event = read_ts_event(chunk.arrays()[self.ts_event_col].as_ref(), self.batch_row_idx);
        Some(SortKey {
            ts_event,
            file_idx: self.file_idx,
            row_idx: self.global_row_idx,
        })
    }

    /// The current chunk and the row's index within it, for the output
    /// buffer to reference via `Growable` at flush time.
    pub fn current_row(&self) -> Option<(Arc<Chunk<Box<dyn Array>>>, usize)> {
        self.current_chunk
            .as_ref()
            .map(|chunk| (Arc::clone(chunk), self.batch_row_idx))
    }

    pub fn advance(&mut self) -> Result<()> {
        self.batch_row_idx += 1;
        self.global_row_idx += 1;
        let exhausted = self
            .current_chunk
            .as_ref()
            .map(|chunk| self.batch_row_idx >= chunk.len())
            .unwrap_or(true);
        if exhausted {
            self.load_next_chunk()?;
        }
        Ok(())
    }
}

fn decode_chunk(chunk: &Chunk<Box<dyn Array>>) -> Result<Chunk<Box<dyn Array>>> {
    let arrays = chunk
        .arrays()
        .iter()
        .map(|array| match array.data_type() {
            DataType::Dictionary(_, value_type, _) => {
                cast(array.as_ref(), value_type.as_ref(), CastOptions::default())
                    .context("decoding dictionary-encoded column")
            }
            _ => Ok(array.clone()),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Chunk::new(arrays))
}

fn read_ts_event(array: &dyn Array, row: usize) -> Option<i64> {
    use arrow2::array::{Int32Array, Int64Array};
    if let Some(array) = array.as_any().downcast_ref::<Int64Array>() {
        return array.get(row);
    }
    if let Some(array) = array.as_any().downcast_ref::<Int32Array>() {
        return array.get(row).map(i64::from);
    }
    None
}
