use serde::Serialize;
use std::ops::Range;

use crate::errors::{ScanError, ScanResult};

/// Half-open record interval `[start, end)` owned by one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkRange {
    pub start: usize,
    pub end: usize,
}

impl WorkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Computes the records owned by `worker_index`.
///
/// Every worker gets `corpus_size / group_size` records in order; the last
/// worker also takes the remainder. Every rank computes this independently
/// from the same scalars, so no communication is needed to agree on it.
pub fn work_range(
    corpus_size: usize,
    group_size: usize,
    worker_index: usize,
) -> ScanResult<WorkRange> {
    if group_size == 0 {
        return Err(ScanError::invalid_partition("group size must be positive"));
    }
    if worker_index >= group_size {
        return Err(ScanError::invalid_partition(format!(
            "worker index {} out of range for group of {}",
            worker_index, group_size
        )));
    }

    let chunk = corpus_size / group_size;
    let start = worker_index * chunk;
    let end = if worker_index == group_size - 1 {
        corpus_size
    } else {
        start + chunk
    };
    Ok(WorkRange { start, end })
}

/// All ranges for a group, in worker order
pub fn all_ranges(corpus_size: usize, group_size: usize) -> ScanResult<Vec<WorkRange>> {
    (0..group_size)
        .map(|worker| work_range(corpus_size, group_size, worker))
        .collect()
}
