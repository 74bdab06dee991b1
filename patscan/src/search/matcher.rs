use serde::{Deserialize, Serialize};

/// Strategy for counting pattern occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Linear-time scan driven by the failure function
    #[default]
    Kmp,
    /// Quadratic window comparison, kept as a reference baseline
    BruteForce,
}

/// Counts exact, possibly overlapping occurrences of one pattern.
///
/// The failure table is computed once in [`PatternMatcher::new`] and reused
/// for every text the matcher scans.
///
/// An empty pattern matches nothing: `count` returns 0 for every text.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: Vec<u8>,
    lps: Vec<usize>,
    strategy: MatchStrategy,
}

impl PatternMatcher {
    /// Creates a new PatternMatcher using the failure-function scan
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        Self::with_strategy(pattern, MatchStrategy::Kmp)
    }

    /// Creates a new PatternMatcher with an explicit strategy
    pub fn with_strategy(pattern: impl Into<Vec<u8>>, strategy: MatchStrategy) -> Self {
        let pattern = pattern.into();
        let lps = match strategy {
            MatchStrategy::Kmp => failure_table(&pattern),
            MatchStrategy::BruteForce => Vec::new(),
        };
        Self {
            pattern,
            lps,
            strategy,
        }
    }

    /// Counts occurrences of the pattern in `text`
    pub fn count(&self, text: &[u8]) -> usize {
        if text.is_empty() || self.pattern.is_empty() {
            return 0;
        }
        match self.strategy {
            MatchStrategy::Kmp => self.count_kmp(text),
            MatchStrategy::BruteForce => count_naive(&self.pattern, text),
        }
    }

    /// Counts occurrences in a corpus slot; null placeholders count zero
    pub fn count_record(&self, record: Option<&[u8]>) -> usize {
        record.map_or(0, |text| self.count(text))
    }

    fn count_kmp(&self, text: &[u8]) -> usize {
        let pat = &self.pattern;
        let (m, n) = (pat.len(), text.len());
        let (mut i, mut j, mut found) = (0, 0, 0);

        while i < n {
            if pat[j] == text[i] {
                i += 1;
                j += 1;
            }
            if j == m {
                found += 1;
                // Resume from the border so overlapping occurrences are counted
                j = self.lps[j - 1];
            } else if i < n && pat[j] != text[i] {
                if j > 0 {
                    j = self.lps[j - 1];
                } else {
                    i += 1;
                }
            }
        }
        found
    }
}

/// Builds the failure function: `lps[k]` is the length of the longest proper
/// prefix of `pattern` that is also a suffix of `pattern[..=k]`.
pub fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let m = pattern.len();
    let mut lps = vec![0; m];
    let mut len = 0;
    let mut i = 1;

    while i < m {
        if pattern[i] == pattern[len] {
            len += 1;
            lps[i] = len;
            i += 1;
        } else if len != 0 {
            len = lps[len - 1];
        } else {
            lps[i] = 0;
            i += 1;
        }
    }
    lps
}

/// Counts overlapping occurrences by comparing every window
pub fn count_naive(pattern: &[u8], text: &[u8]) -> usize {
    if pattern.is_empty() || pattern.len() > text.len() {
        return 0;
    }
    text.windows(pattern.len())
        .filter(|window| *window == pattern)
        .count()
}
