use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::corpus::IngestOptions;
use crate::errors::{ScanError, ScanResult};
use crate::probe::{validate_probe_size, DEFAULT_PROBE_SIZE};
use crate::search::matcher::MatchStrategy;

/// Patterns longer than this are accepted but flagged
pub const PATTERN_LEN_HINT: usize = 255;

/// How the corpus is scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Coordinator replicates the corpus to a group of ranks
    #[default]
    Distributed,
    /// One process, rayon workers over shared memory
    Parallel,
    /// One pass on the calling thread
    Serial,
    /// One MPI process per rank, started by `mpirun` (feature `mpi`)
    Mpi,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "distributed" => Ok(Self::Distributed),
            "parallel" => Ok(Self::Parallel),
            "serial" => Ok(Self::Serial),
            "mpi" => Ok(Self::Mpi),
            other => Err(format!(
                "unknown mode '{}' (expected distributed|parallel|serial|mpi)",
                other
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distributed => write!(f, "distributed"),
            Self::Parallel => write!(f, "parallel"),
            Self::Serial => write!(f, "serial"),
            Self::Mpi => write!(f, "mpi"),
        }
    }
}

/// Report rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{}' (expected text|json)", other)),
        }
    }
}

/// Configuration for one counting run.
///
/// Values come from an optional YAML file named explicitly by the caller,
/// then CLI overrides on top. Example file:
///
/// ```yaml
/// # Ranks in the process group (default: CPU cores)
/// group_size: 4
///
/// # u32 elements moved by the bandwidth probe (0 disables it)
/// probe_size: 1048576
///
/// # Records per distribution frame
/// frame_records: 256
///
/// # Field delimiter (single ASCII character)
/// delimiter: ","
///
/// # distributed | parallel | serial | mpi
/// mode: distributed
///
/// # kmp | brute_force
/// strategy: kmp
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Delimited text file whose first line is a header
    #[serde(default)]
    pub input_path: PathBuf,

    /// Exact byte pattern to count; written as text in a config file
    #[serde(default, with = "pattern_bytes")]
    pub pattern: Vec<u8>,

    /// Ranks in the process group, or rayon workers in parallel mode
    #[serde(default = "default_group_size")]
    pub group_size: NonZeroUsize,

    /// Elements moved by the bandwidth probe
    #[serde(default = "default_probe_size")]
    pub probe_size: usize,

    /// Records carried by each distribution broadcast
    #[serde(default = "default_frame_records")]
    pub frame_records: NonZeroUsize,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default)]
    pub strategy: MatchStrategy,

    #[serde(default)]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_group_size() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_probe_size() -> usize {
    DEFAULT_PROBE_SIZE
}

fn default_frame_records() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_delimiter() -> char {
    ','
}

fn default_log_level() -> String {
    "warn".to_string()
}

mod pattern_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(pattern: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(pattern))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

/// Values supplied on the command line; `None` keeps the file or default value
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub group_size: Option<NonZeroUsize>,
    pub probe_size: Option<usize>,
    pub frame_records: Option<NonZeroUsize>,
    pub delimiter: Option<char>,
    pub mode: Option<ExecutionMode>,
    pub strategy: Option<MatchStrategy>,
    pub format: Option<OutputFormat>,
    pub log_level: Option<String>,
}

impl ScanConfig {
    /// Creates a configuration with default settings
    pub fn new(input_path: impl Into<PathBuf>, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            input_path: input_path.into(),
            pattern: pattern.into(),
            group_size: default_group_size(),
            probe_size: default_probe_size(),
            frame_records: default_frame_records(),
            delimiter: default_delimiter(),
            mode: ExecutionMode::default(),
            strategy: MatchStrategy::default(),
            format: OutputFormat::default(),
            log_level: default_log_level(),
        }
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from(config_path))
            .build()?
            .try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: ScanOverrides) -> Self {
        // CLI values take precedence over config file values
        if let Some(group_size) = cli.group_size {
            self.group_size = group_size;
        }
        if let Some(probe_size) = cli.probe_size {
            self.probe_size = probe_size;
        }
        if let Some(frame_records) = cli.frame_records {
            self.frame_records = frame_records;
        }
        if let Some(delimiter) = cli.delimiter {
            self.delimiter = delimiter;
        }
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
        if let Some(strategy) = cli.strategy {
            self.strategy = strategy;
        }
        if let Some(format) = cli.format {
            self.format = format;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        self
    }

    /// Rejects settings the run cannot honor
    pub fn validate(&self) -> ScanResult<()> {
        if !self.delimiter.is_ascii() || self.delimiter == '\n' {
            return Err(ScanError::config_error(format!(
                "delimiter {:?} must be a single ASCII character other than newline",
                self.delimiter
            )));
        }
        validate_probe_size(self.probe_size, self.group_size.get())?;
        if self.pattern.len() > PATTERN_LEN_HINT {
            warn!(
                "Pattern is {} bytes, longer than the usual {} byte limit",
                self.pattern.len(),
                PATTERN_LEN_HINT
            );
        }
        Ok(())
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            delimiter: self.delimiter as u8,
            ..IngestOptions::default()
        }
    }
}
