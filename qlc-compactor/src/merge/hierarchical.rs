use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use qlc_types::CompactorError;
use tempfile::TempDir;
use tracing::info;

use super::{run_merge_pass, MergeOptions, MergePassResult};

/// Splits `inputs` into consecutive chunks of `max_open_files`, merges each
/// chunk into a scratch intermediate with `seq` injection disabled, then
/// merges the intermediates with `seq` injection enabled. Spec.md §4.6
/// "Hierarchical merge": all intermediates live in a scratch directory that
/// is removed on completion or failure (here, simply `TempDir`'s `Drop`).
pub fn hierarchical_merge(
    inputs: &[PathBuf],
    output_path: &std::path::Path,
    options: &MergeOptions,
) -> Result<MergePassResult> {
    let scratch = TempDir::new().context("creating merge scratch directory")?;
    let mut intermediates = Vec::new();

    for (chunk_idx, chunk_files) in inputs.chunks(options.max_open_files).enumerate() {
        if (options.check_shutdown)() {
            return Err(CompactorError::ShutdownRequested.into());
        }
        let chunk_output = scratch.path().join(format!("chunk_{chunk_idx:04}.parquet"));
        info!(
            chunk_idx,
            files = chunk_files.len(),
            "merging hierarchical chunk"
        );
        let chunk_options = MergeOptions {
            add_seq_column: false,
            ..options.clone()
        };
        run_merge_pass(chunk_files, &chunk_output, &chunk_options)?;
        intermediates.push(chunk_output);
    }

    info!(
        intermediates = intermediates.len(),
        "merging intermediate files into final output"
    );
    run_merge_pass(&intermediates, output_path, options)
}
