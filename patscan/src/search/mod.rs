//! Exact-match counting and the run harness built around it.
//!
//! # Execution Modes
//!
//! The same matcher drives these ways of scanning a corpus:
//!
//! 1. **Distributed**: the coordinator replicates the corpus to a group of
//!    ranks, each rank counts its own [`WorkRange`](partition::WorkRange),
//!    and the partial counts are reduced back at the coordinator:
//!    ```rust,ignore
//!    let replica = distribute(comm, source, frame_records)?;
//!    let range = work_range(replica.corpus.len(), comm.size(), comm.rank())?;
//!    let total = aggregate(comm, replica.corpus.count_matches(&matcher, range))?;
//!    ```
//!
//! 2. **Parallel**: one process, rayon tasks over the same ranges:
//!    ```rust,ignore
//!    let partials: Vec<u64> = ranges.par_iter()
//!        .map(|range| corpus.count_matches(&matcher, *range))
//!        .collect();
//!    ```
//!
//! 3. **Serial**: one pass on the calling thread, the baseline the others
//!    must agree with.
//!
//! 4. **Mpi**: the distributed sequence over an MPI world, one OS process per
//!    rank, through [`engine::run_mpi`]. Needs the `mpi` feature.
//!
//! # Matching
//!
//! Counting uses the failure function of the pattern, so each text is scanned
//! once and overlapping occurrences are all counted: `"aa"` occurs three times
//! in `"aaaa"`.

pub mod engine;
pub mod matcher;
pub mod partition;

pub use engine::{run, run_distributed, run_mpi, run_parallel, run_rank, run_serial};
pub use matcher::{MatchStrategy, PatternMatcher};
pub use partition::{work_range, WorkRange};
