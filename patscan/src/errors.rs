//! Error types for patscan.
//!
//! Every failure in a run is either fatal to the whole process group (the
//! coordinator aborts and every rank unwinds with an error) or a silent,
//! zero-contribution skip that never reaches this type (malformed rows).
use std::path::PathBuf;
use thiserror::Error;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while ingesting, distributing or scanning a corpus
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to read input {path}: {source}")]
    Ingestion {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid work partition: {0}")]
    InvalidPartition(String),
    #[error("Process group aborted: {reason}")]
    Aborted { reason: String },
    #[error("Rank {rank} disconnected from the process group")]
    Disconnected { rank: usize },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Bandwidth probe mismatch at index {index}: expected {expected}, found {found}")]
    ProbeMismatch { index: usize, expected: u32, found: u32 },
    #[error("Rank {rank} panicked")]
    RankPanicked { rank: usize },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ScanError {
    pub fn ingestion(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Ingestion {
            path: path.into(),
            source,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_partition(msg: impl Into<String>) -> Self {
        Self::InvalidPartition(msg.into())
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error came from a peer tearing the group down rather than
    /// from a failure on the local rank.
    pub fn is_group_teardown(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Disconnected { .. })
    }
}

impl From<config::ConfigError> for ScanError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
