//! The streaming external k-way merger, spec.md §4.6: fast concat for
//! disjoint inputs, a direct k-way merge otherwise, and a hierarchical
//! fan-in when the input count exceeds the open-file budget. Dictionary
//! encoding conflicts are retried once with per-column decoding enabled.

mod fast_path;
mod file_stream;
mod hierarchical;
mod kway;
mod rowbuf;
mod schema;
mod sort_key;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use writer::{has_parquet_trailing_magic, sha256_of_file};

/// Rows held per `FileStream`'s decoded batch, spec.md §5 memory discipline.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
/// Rows buffered before a flush to the output writer.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 200_000;
/// Max simultaneously open input files, from `merge_writer.py`'s
/// `MAX_OPEN_FILES` (safe for typical process ulimits).
pub const DEFAULT_MAX_OPEN_FILES: usize = 1200;

#[derive(Clone)]
pub struct MergeOptions {
    pub batch_size: usize,
    pub output_buffer_size: usize,
    pub max_open_files: usize,
    pub add_seq_column: bool,
    pub decode_dictionaries: bool,
    pub check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl MergeOptions {
    /// Defaults for a top-level partition merge. `stream == "trade"` forces
    /// dictionary decoding and disables the fast path as a defensive measure
    /// against a known producer behavior (spec.md §4.6).
    pub fn for_stream(stream: &str, check_shutdown: Arc<dyn Fn() -> bool + Send + Sync>) -> Self {
        let is_trade = stream == "trade";
        MergeOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            add_seq_column: true,
            decode_dictionaries: is_trade,
            check_shutdown,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeTimings {
    pub init_ms: u64,
    pub loop_ms: u64,
    pub flush_ms: u64,
}

/// Completion metadata returned by a merge, spec.md §4.6: `{rows,
/// ts_event_min, ts_event_max, sha256, input_parts, duration_ms, timings}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCompletion {
    pub rows: u64,
    pub ts_event_min: Option<i64>,
    pub ts_event_max: Option<i64>,
    pub sha256: String,
    pub input_parts: usize,
    pub duration_ms: u64,
    pub timings: MergeTimings,
}

pub(crate) struct MergePassResult {
    pub rows: u64,
    pub ts_event_min: Option<i64>,
    pub ts_event_max: Option<i64>,
    pub timings: MergeTimings,
}

/// Top-level entry point. Selects hierarchical / fast-concat / direct k-way
/// per spec.md §4.6 and retries once with dictionary decoding if a read
/// raises an encoding-conflict error.
pub fn merge(inputs: &[PathBuf], output_path: &Path, options: MergeOptions) -> Result<MergeCompletion> {
    let start = Instant::now();
    let input_parts = inputs.len();

    let mut sorted_inputs = inputs.to_vec();
    sorted_inputs.sort();

    let pass = run_merge_pass_with_fallback(&sorted_inputs, output_path, options)?;

    let sha256 = sha256_of_file(output_path)?;
    Ok(MergeCompletion {
        rows: pass.rows,
        ts_event_min: pass.ts_event_min,
        ts_event_max: pass.ts_event_max,
        sha256,
        input_parts,
        duration_ms: start.elapsed().as_millis() as u64,
        timings: pass.timings,
    })
}

fn run_merge_pass_with_fallback(
    inputs: &[PathBuf],
    output_path: &Path,
    options: MergeOptions,
) -> Result<MergePassResult> {
    match run_merge_pass(inputs, output_path, &options) {
        Ok(result) => Ok(result),
        Err(err) if !options.decode_dictionaries && is_dictionary_conflict(&err) => {
            warn!("dictionary conflict detected, retrying with dictionary decoding enabled");
            let retried = MergeOptions {
                decode_dictionaries: true,
                ..options
            };
            run_merge_pass(inputs, output_path, &retried)
        }
        Err(err) => Err(err),
    }
}

fn is_dictionary_conflict(err: &anyhow::Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("more than one dictionary") || message.contains("dictionary")
}

pub(crate) fn run_merge_pass(
    inputs: &[PathBuf],
    output_path: &Path,
    options: &MergeOptions,
) -> Result<MergePassResult> {
    if inputs.len() > options.max_open_files {
        let result = hierarchical::hierarchical_merge(inputs, output_path, options)?;
        return Ok(result);
    }

    if options.decode_dictionaries {
        return run_kway(inputs, output_path, options);
    }

    let verdict = fast_path::check_ordering(inputs)?;
    if verdict.is_ordered() {
        let init = Instant::now();
        let loop_start = Instant::now();
        let result = fast_path::fast_concat(
            inputs,
            output_path,
            options.batch_size,
            options.output_buffer_size,
            options.add_seq_column,
            Arc::clone(&options.check_shutdown),
        )?;
        Ok(MergePassResult {
            rows: result.rows,
            ts_event_min: result.ts_event_min,
            ts_event_max: result.ts_event_max,
            timings: MergeTimings {
                init_ms: init.elapsed().as_millis() as u64,
                loop_ms: loop_start.elapsed().as_millis() as u64,
                flush_ms: 0,
            },
        })
    } else {
        warn!(reason = %verdict.reason(), "fast path disqualified, falling back to k-way merge");
        run_kway(inputs, output_path, options)
    }
}

fn run_kway(inputs: &[PathBuf], output_path: &Path, options: &MergeOptions) -> Result<MergePassResult> {
    let init = Instant::now();
    let merger = kway::KWayMerger::new(
        inputs,
        options.batch_size,
        options.output_buffer_size,
        options.add_seq_column,
        options.decode_dictionaries,
        Arc::clone(&options.check_shutdown),
    )?;
    let init_ms = init.elapsed().as_millis() as u64;

    let loop_start = Instant::now();
    let result = merger.run(output_path)?;
    let loop_ms = loop_start.elapsed().as_millis() as u64;

    Ok(MergePassResult {
        rows: result.rows,
        ts_event_min: result.ts_event_min,
        ts_event_max: result.ts_event_max,
        timings: MergeTimings {
            init_ms,
            loop_ms,
            flush_ms: 0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow2::array::{Array, DictionaryArray, Int32Array, Int64Array, Utf8Array};
    use arrow2::chunk::Chunk;
    use arrow2::datatypes::{DataType, Field, Schema};
    use arrow2::io::parquet::read::{self, FileReader};
    use std::fs::File;
    use std::io::BufReader;
    use tempfile::TempDir;

    fn no_shutdown() -> Arc<dyn Fn() -> bool + Send + Sync> {
        Arc::new(|| false)
    }

    fn options(max_open_files: usize, output_buffer_size: usize, decode_dictionaries: bool) -> MergeOptions {
        MergeOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            output_buffer_size,
            max_open_files,
            add_seq_column: true,
            decode_dictionaries,
            check_shutdown: no_shutdown(),
        }
    }

    /// Writes a plain (non-dictionary) three-column fixture, mirroring the
    /// synthetic rows `test_merge_determinism.py`'s `create_test_parquet`
    /// builds: `ts_event: int64`, `symbol: utf8`, `value: float64`.
    fn write_fixture(path: &Path, ts_events: &[i64], symbols: &[&str]) {
        let schema = Schema::from(vec![
            Field::new("ts_event", DataType::Int64, false),
            Field::new("symbol", DataType::Utf8, false),
        ]);
        let ts_array: Box<dyn Array> = Box::new(Int64Array::from_vec(ts_events.to_vec()));
        let symbol_array: Box<dyn Array> = Box::new(Utf8Array::<i32>::from_slice(symbols));
        let chunk = Chunk::new(vec![ts_array, symbol_array]);
        let mut writer = writer::OutputWriter::create(path, schema).unwrap();
        writer.write_chunk(chunk).unwrap();
        writer.close().unwrap();
    }

    /// Writes a fixture whose `symbol` column is dictionary-encoded with a
    /// single value repeated for every row, so that two fixtures built with
    /// different `symbol` values carry genuinely distinct per-file
    /// dictionaries -- the scenario `merge_writer.py`'s dictionary conflict
    /// repro depends on.
    fn write_dict_fixture(path: &Path, ts_events: &[i64], symbol: &str) {
        let keys = Int32Array::from_vec(vec![0i32; ts_events.len()]);
        let values: Box<dyn Array> = Box::new(Utf8Array::<i32>::from_slice([symbol]));
        let dict_array = DictionaryArray::try_from_keys(keys, values).unwrap();
        let schema = Schema::from(vec![
            Field::new("ts_event", DataType::Int64, false),
            Field::new("symbol", dict_array.data_type().clone(), false),
        ]);
        let ts_array: Box<dyn Array> = Box::new(Int64Array::from_vec(ts_events.to_vec()));
        let symbol_array: Box<dyn Array> = Box::new(dict_array);
        let chunk = Chunk::new(vec![ts_array, symbol_array]);
        let mut writer = writer::OutputWriter::create(path, schema).unwrap();
        writer.write_chunk(chunk).unwrap();
        writer.close().unwrap();
    }

    /// Reads an output file back the same way the merger's own readers do,
    /// returning the full `ts_event` and `seq` columns in file order.
    fn read_columns(path: &Path) -> (Vec<i64>, Vec<i64>) {
        let file = File::open(path).unwrap();
        let mut reader = BufReader::new(file);
        let metadata = read::read_metadata(&mut reader).unwrap();
        let schema = read::infer_schema(&metadata).unwrap();
        let ts_idx = schema.fields.iter().position(|f| f.name == "ts_event").unwrap();
        let seq_idx = schema.fields.iter().position(|f| f.name == "seq");
        let row_groups = metadata.row_groups.clone();
        let file_reader = FileReader::new(reader, row_groups, schema, None, None, None);

        let mut ts_event = Vec::new();
        let mut seq = Vec::new();
        for chunk in file_reader {
            let chunk = chunk.unwrap();
            let ts_array = chunk.arrays()[ts_idx].as_any().downcast_ref::<Int64Array>().unwrap();
            ts_event.extend(ts_array.iter().flatten().copied());
            if let Some(seq_idx) = seq_idx {
                let seq_array = chunk.arrays()[seq_idx].as_any().downcast_ref::<Int64Array>().unwrap();
                seq.extend(seq_array.iter().flatten().copied());
            }
        }
        (ts_event, seq)
    }

    fn three_file_fixture(dir: &Path) -> Vec<PathBuf> {
        // Mirrors `run_synthetic_test`'s three overlapping input files.
        let p1 = dir.join("part1.parquet");
        let p2 = dir.join("part2.parquet");
        let p3 = dir.join("part3.parquet");
        write_fixture(&p1, &[100, 200, 300], &["A", "A", "A"]);
        write_fixture(&p2, &[150, 200, 250], &["B", "B", "B"]);
        write_fixture(&p3, &[50, 400, 500], &["C", "C", "C"]);
        vec![p1, p2, p3]
    }

    #[test]
    fn three_file_overlap_merge_sorts_and_injects_dense_seq() {
        let dir = TempDir::new().unwrap();
        let inputs = three_file_fixture(dir.path());
        let output = dir.path().join("out.parquet");

        let completion = merge(&inputs, &output, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();
        assert_eq!(completion.rows, 9);
        assert_eq!(completion.input_parts, 3);

        let (ts_event, seq) = read_columns(&output);
        assert_eq!(ts_event, vec![50, 100, 150, 200, 200, 250, 300, 400, 500]);
        assert_eq!(seq, (0..9).collect::<Vec<_>>());
        assert_eq!(completion.ts_event_min, Some(50));
        assert_eq!(completion.ts_event_max, Some(500));
    }

    #[test]
    fn merge_is_deterministic_across_repeated_runs() {
        let dir = TempDir::new().unwrap();
        let inputs = three_file_fixture(dir.path());
        let output1 = dir.path().join("out1.parquet");
        let output2 = dir.path().join("out2.parquet");

        let completion1 = merge(&inputs, &output1, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();
        let completion2 = merge(&inputs, &output2, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();

        assert_eq!(completion1.rows, completion2.rows);
        assert_eq!(completion1.sha256, completion2.sha256);
        assert_eq!(read_columns(&output1), read_columns(&output2));
    }

    #[test]
    fn disjoint_inputs_take_the_fast_path_and_preserve_row_count() {
        let dir = TempDir::new().unwrap();
        let p1 = dir.path().join("a.parquet");
        let p2 = dir.path().join("b.parquet");
        write_fixture(&p1, &(0..15).collect::<Vec<_>>(), &["A"; 15]);
        write_fixture(&p2, &(15..30).collect::<Vec<_>>(), &["B"; 15]);

        let output = dir.path().join("out.parquet");
        let completion = merge(&[p1, p2], &output, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();

        assert_eq!(completion.rows, 30);
        let (ts_event, seq) = read_columns(&output);
        assert_eq!(ts_event, (0..30).collect::<Vec<_>>());
        assert_eq!(seq, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn fast_path_and_forced_kway_agree_on_disjoint_inputs() {
        // Uses genuinely disjoint inputs so the fast-concat path is actually
        // selected on one side (the overlapping three_file_fixture would
        // fail check_ordering and route both runs through k-way, which
        // wouldn't exercise P5 at all).
        let dir = TempDir::new().unwrap();
        let p1 = dir.path().join("a.parquet");
        let p2 = dir.path().join("b.parquet");
        let p3 = dir.path().join("c.parquet");
        write_fixture(&p1, &(0..10).collect::<Vec<_>>(), &["A"; 10]);
        write_fixture(&p2, &(10..20).collect::<Vec<_>>(), &["B"; 10]);
        write_fixture(&p3, &(20..30).collect::<Vec<_>>(), &["C"; 10]);
        let inputs = vec![p1, p2, p3];

        let fast_output = dir.path().join("fast.parquet");
        let kway_output = dir.path().join("kway.parquet");

        let fast = merge(&inputs, &fast_output, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();
        // decode_dictionaries forces run_kway even though these inputs would
        // otherwise qualify for the fast concat path.
        let kway = merge(&inputs, &kway_output, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, true)).unwrap();

        // spec.md §8 P5: fast concat and direct k-way must be byte-identical,
        // not merely agree on decoded column values.
        assert_eq!(fast.sha256, kway.sha256);
        assert_eq!(read_columns(&fast_output), read_columns(&kway_output));
    }

    #[test]
    fn hierarchical_fan_in_matches_a_single_pass_merge() {
        let dir = TempDir::new().unwrap();
        let inputs = three_file_fixture(dir.path());
        let direct_output = dir.path().join("direct.parquet");
        let hierarchical_output = dir.path().join("hierarchical.parquet");

        let direct = merge(&inputs, &direct_output, options(DEFAULT_MAX_OPEN_FILES, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();
        // max_open_files=1 forces every input into its own hierarchical
        // chunk, exercising the scratch-directory fan-in path.
        let hierarchical = merge(&inputs, &hierarchical_output, options(1, DEFAULT_OUTPUT_BUFFER_SIZE, false)).unwrap();

        // spec.md §8 P6: byte-identical output across max_open_files values.
        assert_eq!(direct.sha256, hierarchical.sha256);
        assert_eq!(read_columns(&direct_output), read_columns(&hierarchical_output));
    }

    #[test]
    fn dictionary_conflict_under_hierarchical_merge_still_sorts_and_preserves_rows() {
        // Reproduces merge_writer.py's "Column cannot have more than one
        // dictionary" repro: per-file dictionaries for the same column,
        // forced through the hierarchical path with small buffers so the
        // conflict (if the underlying writer raises one) is retried via the
        // decode-dictionaries fallback rather than surfacing to the caller.
        let dir = TempDir::new().unwrap();
        let p1 = dir.path().join("d1.parquet");
        let p2 = dir.path().join("d2.parquet");
        let p3 = dir.path().join("d3.parquet");
        write_dict_fixture(&p1, &[100, 200], "A");
        write_dict_fixture(&p2, &[150, 250], "B");
        write_dict_fixture(&p3, &[50, 300], "C");

        let output = dir.path().join("out.parquet");
        let completion = merge(
            &[p1, p2, p3],
            &output,
            options(2, 2, false),
        )
        .unwrap();

        assert_eq!(completion.rows, 6);
        let (ts_event, _) = read_columns(&output);
        assert_eq!(ts_event, vec![50, 100, 150, 200, 250, 300]);
    }

    #[test]
    fn for_stream_forces_dictionary_decoding_for_trade_stream() {
        let shutdown = no_shutdown();
        let trade = MergeOptions::for_stream("trade", Arc::clone(&shutdown));
        assert!(trade.decode_dictionaries);
        let book = MergeOptions::for_stream("book", shutdown);
        assert!(!book.decode_dictionaries);
    }
}
