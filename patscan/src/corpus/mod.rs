//! The searchable corpus: one optional text field per input row.
pub mod codec;
pub mod ingest;

pub use ingest::{extract_field, load_corpus, IngestOptions};

use crate::search::matcher::PatternMatcher;
use crate::search::partition::WorkRange;

/// Ordered records; `None` marks a row that had no usable text field.
///
/// Positions are stable: a malformed row keeps its slot so record indices
/// mean the same thing on every rank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    records: Vec<Option<Vec<u8>>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Option<Vec<u8>>>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.records.get(index).and_then(|r| r.as_deref())
    }

    pub fn records(&self) -> &[Option<Vec<u8>>] {
        &self.records
    }

    /// Number of null placeholders
    pub fn null_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_none()).count()
    }

    /// Total bytes of present records
    pub fn byte_len(&self) -> usize {
        self.records.iter().flatten().map(Vec::len).sum()
    }

    /// Counts matches over the records in `range`
    pub fn count_matches(&self, matcher: &PatternMatcher, range: WorkRange) -> u64 {
        self.records[range.as_range()]
            .iter()
            .map(|record| matcher.count_record(record.as_deref()) as u64)
            .sum()
    }

    /// Counts matches in each record, in corpus order
    pub fn per_record_counts(&self, matcher: &PatternMatcher) -> Vec<usize> {
        self.records
            .iter()
            .map(|record| matcher.count_record(record.as_deref()))
            .collect()
    }
}

impl FromIterator<Option<Vec<u8>>> for Corpus {
    fn from_iter<I: IntoIterator<Item = Option<Vec<u8>>>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<S: AsRef<[u8]>> From<&[S]> for Corpus {
    fn from(texts: &[S]) -> Self {
        texts.iter().map(|t| Some(t.as_ref().to_vec())).collect()
    }
}
