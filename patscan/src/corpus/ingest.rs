use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, trace, warn};

use super::Corpus;
use crate::errors::{ScanError, ScanResult};

// Constants for file reading
const BUFFER_CAPACITY: usize = 65536;
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// Zero-based index of the searched field
pub const TEXT_FIELD_INDEX: usize = 2;

/// How rows are split into fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub delimiter: u8,
    pub field_index: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            field_index: TEXT_FIELD_INDEX,
        }
    }
}

/// Reads a delimited text file into a corpus.
///
/// The first line is a header and is skipped. Every following line becomes
/// one corpus slot: the extracted field, or `None` when the row has too few
/// fields.
pub fn load_corpus(path: &Path, options: &IngestOptions) -> ScanResult<Corpus> {
    let file = File::open(path).map_err(|e| ScanError::ingestion(path, e))?;
    let size = match file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!("Failed to get metadata for {}: {}", path.display(), e);
            0
        }
    };

    let corpus = if size >= LARGE_FILE_THRESHOLD {
        trace!("Memory-mapping large input: {}", path.display());
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ScanError::ingestion(path, e))?;
        parse_rows(&mmap, options)
    } else {
        let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);
        let mut bytes = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| ScanError::ingestion(path, e))?;
        parse_rows(&bytes, options)
    };

    debug!(
        "Loaded {} records ({} malformed, {} bytes) from {}",
        corpus.len(),
        corpus.null_count(),
        corpus.byte_len(),
        path.display()
    );
    Ok(corpus)
}

/// Splits file contents into rows, skipping the header
pub fn parse_rows(contents: &[u8], options: &IngestOptions) -> Corpus {
    let body = contents.strip_suffix(b"\n").unwrap_or(contents);
    if body.is_empty() {
        return Corpus::new();
    }

    body.split(|&b| b == b'\n')
        .skip(1)
        .enumerate()
        .map(|(row, line)| {
            let field = extract_field(line, options.delimiter, options.field_index);
            if field.is_none() {
                trace!("Row {} has fewer than {} fields", row + 1, options.field_index + 1);
            }
            field
        })
        .collect()
}

/// Pulls field `index` out of one row.
///
/// Splitting is naive: runs of delimiters collapse and quotes
/// do not protect delimiters. A field wrapped in double quotes loses exactly
/// the outer pair.
pub fn extract_field(line: &[u8], delimiter: u8, index: usize) -> Option<Vec<u8>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let field = line
        .split(|&b| b == delimiter)
        .filter(|token| !token.is_empty())
        .nth(index)?;

    let field = match field {
        [b'"', inner @ .., b'"'] => inner,
        _ => field,
    };
    Some(field.to_vec())
}
