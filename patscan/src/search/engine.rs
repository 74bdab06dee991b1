use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::matcher::PatternMatcher;
use super::partition::{all_ranges, work_range, WorkRange};
use crate::aggregate::{aggregate, sum_partials};
use crate::config::{ExecutionMode, ScanConfig};
use crate::corpus::{load_corpus, Corpus};
use crate::distribute::distribute;
use crate::errors::{ScanError, ScanResult};
use crate::group::{Collectives, ProcessGroup};
use crate::probe::run_probe;
use crate::report::{CoordinatorView, RunSummary, TimingReport};

/// Runs a counting job in the configured mode.
///
/// `ExecutionMode::Mpi` starts one process per rank and is entered through
/// [`run_mpi`] instead.
pub fn run(config: &ScanConfig) -> ScanResult<RunSummary> {
    config.validate()?;
    info!(
        "Counting {:?} in {} ({} mode)",
        String::from_utf8_lossy(&config.pattern),
        config.input_path.display(),
        config.mode
    );

    let summary = match config.mode {
        ExecutionMode::Distributed => run_distributed(config)?,
        ExecutionMode::Parallel => run_parallel(config)?,
        ExecutionMode::Serial => run_serial(config)?,
        ExecutionMode::Mpi => {
            return Err(ScanError::config_error(
                "mpi mode runs once per process; start it with run_mpi under mpirun",
            ))
        }
    };

    info!(
        "Run complete. Found {} matches across {} processes",
        summary.total_matches, summary.processes
    );
    Ok(summary)
}

/// Launches the in-process group and runs [`run_rank`] on every rank
pub fn run_distributed(config: &ScanConfig) -> ScanResult<RunSummary> {
    let group = ProcessGroup::new(config.group_size);
    let outcomes = group.launch(|comm| run_rank(comm, config))?;
    group.metrics().log_stats();
    summarize(ExecutionMode::Distributed, outcomes)
}

/// Runs this process's rank of an MPI job.
///
/// Returns the summary on the coordinator and `None` on every other rank. A
/// failure on any rank aborts the whole job.
#[cfg(feature = "mpi")]
pub fn run_mpi(config: &ScanConfig) -> ScanResult<Option<RunSummary>> {
    use crate::group::MpiCommunicator;

    config.validate()?;
    let universe = mpi::initialize()
        .ok_or_else(|| ScanError::config_error("MPI was already initialized"))?;
    let mut comm = MpiCommunicator::new(universe.world());
    let processes = comm.size();
    debug!("Rank {} of {} joined the MPI job", comm.rank(), processes);

    match run_rank(&mut comm, config) {
        Ok(view) => view
            .map(|view| coordinator_summary(ExecutionMode::Mpi, processes, view))
            .transpose(),
        Err(err) => {
            comm.abort(&err.to_string());
            Err(err)
        }
    }
}

#[cfg(not(feature = "mpi"))]
pub fn run_mpi(_config: &ScanConfig) -> ScanResult<Option<RunSummary>> {
    Err(ScanError::config_error(
        "mpi mode needs a build with the `mpi` feature",
    ))
}

/// One rank's walk through the run.
///
/// Every rank issues the same collectives in the same order; only the
/// coordinator loads the input, and only it comes back with a
/// [`CoordinatorView`].
pub fn run_rank<C: Collectives>(
    comm: &mut C,
    config: &ScanConfig,
) -> ScanResult<Option<CoordinatorView>> {
    let mut timings = TimingReport::default();

    let source = if comm.is_root() {
        let started = Instant::now();
        // A failure here aborts the group before the first broadcast
        let corpus = load_corpus(&config.input_path, &config.ingest_options())?;
        debug!(
            "Ingested {} records in {}",
            corpus.len(),
            humantime::format_duration(started.elapsed())
        );
        Some((corpus, config.pattern.clone()))
    } else {
        None
    };

    let started = Instant::now();
    let replica = distribute(comm, source, config.frame_records)?;
    timings.add_communication(started.elapsed());
    comm.barrier()?;

    let probe = run_probe(comm, config.probe_size)?;
    timings.add_scatter_gather(probe.elapsed);

    let records = replica.corpus.len();
    let range = work_range(records, comm.size(), comm.rank())?;
    let matcher = PatternMatcher::with_strategy(replica.pattern, config.strategy);

    let started = Instant::now();
    let partial = replica.corpus.count_matches(&matcher, range);
    timings.add_computation(started.elapsed());
    debug!(
        "Rank {} scanned records {}..{}",
        comm.rank(),
        range.start,
        range.end
    );

    let started = Instant::now();
    let total = aggregate(comm, partial)?;
    timings.add_communication(started.elapsed());

    Ok(total.map(|total_matches| CoordinatorView {
        total_matches,
        records,
        timings,
    }))
}

/// Scans the corpus with rayon, one task per work range
pub fn run_parallel(config: &ScanConfig) -> ScanResult<RunSummary> {
    let corpus = load_corpus(&config.input_path, &config.ingest_options())?;
    let matcher = PatternMatcher::with_strategy(config.pattern.clone(), config.strategy);
    let workers = config.group_size.get();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ScanError::config_error(format!("failed to build thread pool: {}", e)))?;

    let ranges = all_ranges(corpus.len(), workers)?;
    let started = Instant::now();
    let total = pool.install(|| {
        sum_partials(
            ranges
                .par_iter()
                .map(|range| corpus.count_matches(&matcher, *range))
                .collect::<Vec<u64>>(),
        )
    });
    let computation = started.elapsed();

    Ok(local_summary(
        ExecutionMode::Parallel,
        workers,
        ranges,
        total,
        computation,
    ))
}

/// Scans the corpus on the calling thread
pub fn run_serial(config: &ScanConfig) -> ScanResult<RunSummary> {
    let corpus = load_corpus(&config.input_path, &config.ingest_options())?;
    let matcher = PatternMatcher::with_strategy(config.pattern.clone(), config.strategy);
    let (total, computation) = count_serial(&corpus, &matcher);

    Ok(local_summary(
        ExecutionMode::Serial,
        1,
        vec![WorkRange {
            start: 0,
            end: corpus.len(),
        }],
        total,
        computation,
    ))
}

/// Counts matches over the whole corpus in one pass; the baseline every other
/// mode must agree with
pub fn count_serial(corpus: &Corpus, matcher: &PatternMatcher) -> (u64, Duration) {
    let started = Instant::now();
    let total = corpus.count_matches(
        matcher,
        WorkRange {
            start: 0,
            end: corpus.len(),
        },
    );
    (total, started.elapsed())
}

fn local_summary(
    mode: ExecutionMode,
    processes: usize,
    ranges: Vec<WorkRange>,
    total_matches: u64,
    computation: Duration,
) -> RunSummary {
    let mut timings = TimingReport::default();
    timings.add_computation(computation);
    RunSummary {
        mode,
        processes,
        total_matches,
        timings,
        ranges,
    }
}

fn coordinator_summary(
    mode: ExecutionMode,
    processes: usize,
    view: CoordinatorView,
) -> ScanResult<RunSummary> {
    Ok(RunSummary {
        mode,
        processes,
        total_matches: view.total_matches,
        timings: view.timings,
        ranges: all_ranges(view.records, processes)?,
    })
}

/// Folds per-rank results into one summary.
///
/// When ranks fail, the root cause wins over the aborts it triggered on the
/// other ranks.
fn summarize(
    mode: ExecutionMode,
    outcomes: Vec<ScanResult<Option<CoordinatorView>>>,
) -> ScanResult<RunSummary> {
    let processes = outcomes.len();
    let mut view = None;
    let mut root_cause = None;
    let mut teardown = None;

    for outcome in outcomes {
        match outcome {
            Ok(coordinator) => view = view.or(coordinator),
            Err(err) if err.is_group_teardown() => {
                teardown.get_or_insert(err);
            }
            Err(err) => {
                root_cause.get_or_insert(err);
            }
        }
    }
    if let Some(err) = root_cause.or(teardown) {
        return Err(err);
    }

    let view = view.ok_or_else(|| ScanError::protocol("coordinator produced no total"))?;
    coordinator_summary(mode, processes, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use tempfile::NamedTempFile;

    fn corpus_file(texts: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,title,text").unwrap();
        for (i, text) in texts.iter().enumerate() {
            writeln!(file, "{},title {},\"{}\"", i, i, text).unwrap();
        }
        file
    }

    fn config(file: &NamedTempFile, ranks: usize, mode: ExecutionMode) -> ScanConfig {
        let mut config = ScanConfig::new(file.path(), "abc");
        config.group_size = NonZeroUsize::new(ranks).unwrap();
        config.probe_size = 64;
        config.mode = mode;
        config
    }

    #[test]
    fn test_distributed_split_across_two_ranks() {
        let file = corpus_file(&["abcabcabc", "xyz", "ababc", "abc"]);
        let summary = run(&config(&file, 2, ExecutionMode::Distributed)).unwrap();

        assert_eq!(summary.processes, 2);
        assert_eq!(summary.total_matches, 5);
        assert_eq!(
            summary.ranges,
            vec![WorkRange { start: 0, end: 2 }, WorkRange { start: 2, end: 4 }]
        );
        assert_eq!(
            summary.timings.total(),
            summary.timings.communication
                + summary.timings.scatter_gather
                + summary.timings.computation
        );
    }

    #[test]
    fn test_only_coordinator_sees_total() {
        let file = corpus_file(&["abcabcabc", "xyz", "ababc", "abc"]);
        let config = config(&file, 3, ExecutionMode::Distributed);
        let outcomes = ProcessGroup::new(config.group_size)
            .launch(|comm| run_rank(comm, &config))
            .unwrap();

        let views: Vec<Option<CoordinatorView>> =
            outcomes.into_iter().map(Result::unwrap).collect();
        let root = views[0].unwrap();
        assert_eq!(root.total_matches, 5);
        assert_eq!(root.records, 4);
        assert!(views[1..].iter().all(Option::is_none));
    }

    #[test]
    fn test_modes_agree() {
        let file = corpus_file(&["abcabcabc", "xyz", "ababab", "abc", "", "zabcabz"]);
        for mode in [
            ExecutionMode::Serial,
            ExecutionMode::Parallel,
            ExecutionMode::Distributed,
        ] {
            let summary = run(&config(&file, 3, mode)).unwrap();
            assert_eq!(summary.total_matches, 5, "mode {}", mode);
        }
    }

    #[test]
    fn test_mpi_mode_is_not_run_in_process() {
        let file = corpus_file(&["abc"]);
        let err = run(&config(&file, 2, ExecutionMode::Mpi)).unwrap_err();
        assert!(matches!(err, ScanError::ConfigError(_)));
    }

    #[cfg(not(feature = "mpi"))]
    #[test]
    fn test_run_mpi_needs_feature() {
        let file = corpus_file(&["abc"]);
        let err = run_mpi(&config(&file, 2, ExecutionMode::Mpi)).unwrap_err();
        assert!(matches!(err, ScanError::ConfigError(_)));
    }

    #[test]
    fn test_missing_input_aborts_every_rank() {
        let mut config = ScanConfig::new("no/such/file.csv", "abc");
        config.group_size = NonZeroUsize::new(4).unwrap();
        let err = run(&config).unwrap_err();
        assert!(matches!(err, ScanError::Ingestion { .. }));
    }

    #[test]
    fn test_single_rank_run() {
        let file = corpus_file(&["abc"]);
        let summary = run(&config(&file, 1, ExecutionMode::Distributed)).unwrap();
        assert_eq!(summary.total_matches, 1);
        assert_eq!(summary.ranges, vec![WorkRange { start: 0, end: 1 }]);
    }

    #[test]
    fn test_non_utf8_pattern() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"id,title,text\n1,t,\xff\xfea\xff\xfe\n").unwrap();
        let mut config = ScanConfig::new(file.path(), vec![0xff, 0xfe]);
        config.group_size = NonZeroUsize::new(2).unwrap();
        assert_eq!(run(&config).unwrap().total_matches, 2);
    }
}
