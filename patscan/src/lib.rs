pub mod aggregate;
pub mod config;
pub mod corpus;
pub mod distribute;
pub mod errors;
pub mod group;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod search;

pub use config::{ExecutionMode, OutputFormat, ScanConfig, ScanOverrides};
pub use corpus::Corpus;
pub use errors::{ScanError, ScanResult};
pub use report::{RunSummary, TimingReport};
pub use search::{run, PatternMatcher};
