use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;

use anyhow::{Context, Result};
use arrow2::array::Array;
use arrow2::chunk::Chunk;
use arrow2::datatypes::{DataType, Schema};
use arrow2::io::parquet::write::{
    CompressionOptions, Encoding, FileWriter, RowGroupIterator, Version, WriteOptions,
};
use sha2::{Digest, Sha256};

/// Writer settings shared by every merge path: zstd compression, statistics
/// enabled, row groups aligned with the caller's flush boundary (spec.md
/// §4.6 "Writer settings").
pub fn write_options() -> WriteOptions {
    WriteOptions {
        write_statistics: true,
        compression: CompressionOptions::Zstd(None),
        version: Version::V2,
        data_pagesize_limit: None,
    }
}

fn encoding_for(data_type: &DataType) -> Encoding {
    match data_type {
        DataType::Dictionary(..) => Encoding::RleDictionary,
        DataType::Utf8 | DataType::LargeUtf8 => Encoding::Plain,
        _ => Encoding::Plain,
    }
}

/// Thin wrapper around arrow2's parquet [`FileWriter`], opened once per
/// merge output and fed one [`Chunk`] per flush.
pub struct OutputWriter {
    inner: FileWriter<BufWriter<File>>,
    schema: Schema,
}

impl OutputWriter {
    pub fn create(path: &Path, schema: Schema) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let writer = BufWriter::new(file);
        let options = write_options();
        let inner = FileWriter::try_new(writer, schema.clone(), options)
            .with_context(|| format!("opening parquet writer for {}", path.display()))?;
        Ok(OutputWriter { inner, schema })
    }

    pub fn write_chunk(&mut self, chunk: Chunk<Box<dyn Array>>) -> Result<()> {
        let encodings: Vec<Vec<Encoding>> = self
            .schema
            .fields
            .iter()
            .map(|f| vec![encoding_for(&f.data_type)])
            .collect();
        let row_groups = RowGroupIterator::try_new(
            std::iter::once(Ok(chunk)),
            &self.schema,
            write_options(),
            encodings,
        )
        .context("building row group for flush")?;
        for group in row_groups {
            let group = group.context("materializing row group")?;
            self.inner
                .write(group)
                .context("writing row group to parquet output")?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.inner.end(None).context("finalizing parquet output")?;
        Ok(())
    }
}

/// Checks the last 4 bytes of `path` are the parquet trailing magic `PAR1`,
/// the cheap structural check the worker runs alongside a row-count
/// comparison before trusting a freshly merged file (spec.md §4.7 step 9).
pub fn has_parquet_trailing_magic(path: &Path) -> Result<bool> {
    use std::io::{Seek, SeekFrom};
    let mut file = File::open(path).with_context(|| format!("opening {} for verification", path.display()))?;
    let len = file.metadata()?.len();
    if len < 4 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-4))?;
    let mut tail = [0u8; 4];
    file.read_exact(&mut tail)?;
    Ok(&tail == b"PAR1")
}

/// Hashes the completed output file's byte content, spec.md §4.6 completion
/// metadata: `sha256` is the hash of the final file's byte content.
pub fn sha256_of_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("hashing {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
