//! Run results and the coordinator's timing report.
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::config::ExecutionMode;
use crate::errors::ScanResult;
use crate::search::partition::WorkRange;

/// Time spent in each phase of a run, as seen by the coordinator.
///
/// Buckets only grow; `total` is always the sum of the three.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingReport {
    /// Corpus and pattern broadcasts plus the final reduction
    pub communication: Duration,
    /// Bandwidth probe round trip
    pub scatter_gather: Duration,
    /// Local matching
    pub computation: Duration,
}

impl TimingReport {
    pub fn add_communication(&mut self, elapsed: Duration) {
        self.communication += elapsed;
    }

    pub fn add_scatter_gather(&mut self, elapsed: Duration) {
        self.scatter_gather += elapsed;
    }

    pub fn add_computation(&mut self, elapsed: Duration) {
        self.computation += elapsed;
    }

    pub fn total(&self) -> Duration {
        self.communication + self.scatter_gather + self.computation
    }
}

impl Serialize for TimingReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TimingReport", 4)?;
        state.serialize_field("communication_secs", &self.communication.as_secs_f64())?;
        state.serialize_field("scatter_gather_secs", &self.scatter_gather.as_secs_f64())?;
        state.serialize_field("computation_secs", &self.computation.as_secs_f64())?;
        state.serialize_field("total_secs", &self.total().as_secs_f64())?;
        state.end()
    }
}

/// What the coordinator alone knows at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorView {
    pub total_matches: u64,
    /// Corpus size, from which every rank's range follows
    pub records: usize,
    pub timings: TimingReport,
}

/// The complete result of a run.
///
/// Only the reduced total is reported; per-rank partial counts never leave
/// the reduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: ExecutionMode,
    pub processes: usize,
    pub total_matches: u64,
    pub timings: TimingReport,
    /// Records owned by each rank, in rank order
    pub ranges: Vec<WorkRange>,
}

impl RunSummary {
    pub fn to_json(&self) -> ScanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self.mode {
            ExecutionMode::Distributed | ExecutionMode::Mpi => "Distributed",
            ExecutionMode::Parallel => "Parallel",
            ExecutionMode::Serial => "Serial",
        };
        writeln!(f, "=== {} Pattern Matching Report ===", title)?;
        writeln!(f, "Processes: {}", self.processes)?;
        writeln!(f, "Total Matches: {}", self.total_matches)?;
        writeln!(
            f,
            "Communication Time: {:.6}",
            self.timings.communication.as_secs_f64()
        )?;
        writeln!(
            f,
            "Scatter+Gather Time: {:.6}",
            self.timings.scatter_gather.as_secs_f64()
        )?;
        writeln!(
            f,
            "Computation Time: {:.6}",
            self.timings.computation.as_secs_f64()
        )?;
        writeln!(f, "Total Time: {:.6}", self.timings.total().as_secs_f64())
    }
}
