use std::sync::Arc;

use anyhow::Result;
use arrow2::array::{growable::make_growable, Array, Int64Array};
use arrow2::chunk::Chunk;
use arrow2::datatypes::Schema;

use super::writer::OutputWriter;

/// One buffered output row: a reference to the chunk it was taken from plus
/// its row index within that chunk. Chunks stay alive for as long as any
/// buffered row still references them (bounded by `output_buffer_size` rows
/// spread across at most `max_open_files` distinct chunks).
///
/// Shared between the k-way merge and the fast-concat path so both route
/// output through the identical flush boundary and column-assembly code;
/// that identity is what makes P5/P6 byte-for-byte equivalence possible.
pub struct BufferedRow {
    pub chunk: Arc<Chunk<Box<dyn Array>>>,
    pub row_idx: usize,
}

/// Materializes the buffered rows into one [`Chunk`] via `Growable` (one
/// per-column append pass, per spec.md §9's design note) and writes it,
/// injecting the dense `seq` range at flush time.
pub fn flush(
    buffer: &mut Vec<BufferedRow>,
    schema: &Schema,
    seq_idx: Option<usize>,
    seq_start: u64,
    writer: &mut OutputWriter,
) -> Result<u64> {
    let n_rows = buffer.len() as u64;
    let mut arrays: Vec<Box<dyn Array>> = Vec::with_capacity(schema.fields.len());
    let mut source_col = 0usize;

    for out_col in 0..schema.fields.len() {
        if Some(out_col) == seq_idx {
            let seq: Vec<i64> = (seq_start as i64..seq_start as i64 + n_rows as i64).collect();
            arrays.push(Box::new(Int64Array::from_vec(seq)) as Box<dyn Array>);
            continue;
        }

        let source_arrays: Vec<&dyn Array> = buffer
            .iter()
            .map(|row| row.chunk.arrays()[source_col].as_ref())
            .collect();
        let mut growable = make_growable(&source_arrays, false, buffer.len());
        for (i, row) in buffer.iter().enumerate() {
            growable.extend(i, row.row_idx, 1);
        }
        arrays.push(growable.as_box());
        source_col += 1;
    }

    writer.write_chunk(Chunk::new(arrays))?;
    buffer.clear();
    Ok(n_rows)
}
