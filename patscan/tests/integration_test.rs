use anyhow::Result;
use patscan::{
    aggregate::aggregate,
    corpus::load_corpus,
    distribute::distribute,
    group::{Collectives, ProcessGroup},
    probe::run_probe,
    search::{work_range, MatchStrategy, WorkRange},
    Corpus, ExecutionMode, PatternMatcher, ScanConfig, ScanError,
};
use std::fs::File;
use std::io::Write;
use std::num::NonZeroUsize;
use tempfile::{tempdir, TempDir};

fn write_corpus(dir: &TempDir, name: &str, texts: &[&str]) -> Result<std::path::PathBuf> {
    let path = dir.path().join(name);
    let mut file = File::create(&path)?;
    writeln!(file, "id,title,text")?;
    for (i, text) in texts.iter().enumerate() {
        writeln!(file, "{},title {},\"{}\"", i, i, text)?;
    }
    Ok(path)
}

fn ranks(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[test]
fn test_end_to_end_two_ranks() -> Result<()> {
    let dir = tempdir()?;
    let path = write_corpus(&dir, "corpus.csv", &["abcabcabc", "xyz", "ababc", "abc"])?;

    let mut config = ScanConfig::new(&path, "abc");
    config.group_size = ranks(2);
    config.probe_size = 1024;
    let summary = patscan::run(&config)?;

    assert_eq!(summary.total_matches, 5);
    assert_eq!(
        summary.ranges,
        vec![WorkRange { start: 0, end: 2 }, WorkRange { start: 2, end: 4 }]
    );
    Ok(())
}

#[test]
fn test_local_sums_before_reduction() -> Result<()> {
    let corpus = Corpus::from(&["abcabcabc", "xyz", "ababc", "abc"][..]);
    let group = ProcessGroup::new(ranks(2));

    let results = group.launch(|comm| {
        let input = comm.is_root().then(|| (corpus.clone(), b"abc".to_vec()));
        let replica = distribute(comm, input, ranks(1))?;
        let range = work_range(replica.corpus.len(), comm.size(), comm.rank())?;
        let local = replica
            .corpus
            .count_matches(&PatternMatcher::new(replica.pattern), range);
        let total = aggregate(comm, local)?;
        Ok((local, total))
    })?;

    let results: Vec<(u64, Option<u64>)> = results.into_iter().collect::<Result<_, _>>()?;
    assert_eq!(results, vec![(3, Some(5)), (2, None)]);
    Ok(())
}

#[test]
fn test_overlapping_pattern_counts() -> Result<()> {
    let corpus = Corpus::from(&["abcabcabc", "xyz", "ababab", "abc"][..]);
    let matcher = PatternMatcher::new("abc");
    assert_eq!(corpus.per_record_counts(&matcher), vec![3, 0, 0, 1]);

    let overlapping = PatternMatcher::new("aba");
    assert_eq!(overlapping.count(b"ababab"), 2);
    Ok(())
}

#[test]
fn test_distributed_matches_serial_for_any_group_size() -> Result<()> {
    let dir = tempdir()?;
    let texts: Vec<String> = (0..37)
        .map(|i| "ab".repeat(i % 5) + &"abc".repeat(i % 3) + "x")
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let path = write_corpus(&dir, "corpus.csv", &refs)?;

    let mut serial = ScanConfig::new(&path, "bab");
    serial.mode = ExecutionMode::Serial;
    let expected = patscan::run(&serial)?.total_matches;
    assert!(expected > 0);

    for size in [1, 2, 4, 8] {
        let mut config = ScanConfig::new(&path, "bab");
        config.group_size = ranks(size);
        config.probe_size = 96;
        config.frame_records = ranks(5);
        let summary = patscan::run(&config)?;
        assert_eq!(summary.total_matches, expected, "group of {}", size);
        assert_eq!(summary.ranges.len(), size);
    }
    Ok(())
}

#[test]
fn test_brute_force_agrees_with_kmp() -> Result<()> {
    let dir = tempdir()?;
    let path = write_corpus(&dir, "corpus.csv", &["aaaaaa", "baaab", "", "aaa"])?;

    let mut kmp = ScanConfig::new(&path, "aa");
    kmp.group_size = ranks(3);
    let mut brute = kmp.clone();
    brute.strategy = MatchStrategy::BruteForce;

    assert_eq!(patscan::run(&kmp)?.total_matches, 9);
    assert_eq!(patscan::run(&brute)?.total_matches, 9);
    Ok(())
}

#[test]
fn test_every_rank_receives_identical_replica() -> Result<()> {
    let source = Corpus::from_records(vec![
        Some(b"first".to_vec()),
        None,
        Some(Vec::new()),
        Some(b"fourth, with bytes \xff\x00".to_vec()),
    ]);
    let expected = source.clone();

    let group = ProcessGroup::new(ranks(3));
    let results = group.launch(|comm| {
        let input = comm
            .is_root()
            .then(|| (source.clone(), b"pat".to_vec()));
        distribute(comm, input, ranks(2))
    })?;

    for result in results {
        let replica = result?;
        assert_eq!(replica.corpus, expected);
        assert_eq!(replica.pattern, b"pat");
    }
    Ok(())
}

#[test]
fn test_collectives_compose_in_one_run() -> Result<()> {
    let corpus = Corpus::from(&["aaa", "a", "aaaa", "b", "aa"][..]);
    let group = ProcessGroup::new(ranks(4));

    let results = group.launch(|comm| {
        let input = comm.is_root().then(|| (corpus.clone(), b"aa".to_vec()));
        let replica = distribute(comm, input, ranks(1))?;
        let probe = run_probe(comm, 10)?;
        let range = work_range(replica.corpus.len(), comm.size(), comm.rank())?;
        let matcher = PatternMatcher::new(replica.pattern);
        let total = aggregate(comm, replica.corpus.count_matches(&matcher, range))?;
        Ok((probe.block_len, total))
    })?;

    let results: Vec<(usize, Option<u64>)> = results.into_iter().collect::<Result<_, _>>()?;
    assert_eq!(results[0], (3, Some(6)));
    assert!(results[1..].iter().all(|(block, total)| *block == 3 && total.is_none()));
    Ok(())
}

#[test]
fn test_missing_input_reports_ingestion_error() -> Result<()> {
    let dir = tempdir()?;
    let mut config = ScanConfig::new(dir.path().join("missing.csv"), "abc");
    config.group_size = ranks(4);

    match patscan::run(&config) {
        Err(ScanError::Ingestion { path, .. }) => {
            assert!(path.ends_with("missing.csv"));
        }
        other => panic!("expected ingestion error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_header_only_input() -> Result<()> {
    let dir = tempdir()?;
    let path = write_corpus(&dir, "empty.csv", &[])?;

    assert!(load_corpus(&path, &Default::default())?.is_empty());

    let mut config = ScanConfig::new(&path, "abc");
    config.group_size = ranks(3);
    let summary = patscan::run(&config)?;
    assert_eq!(summary.total_matches, 0);
    assert!(summary.ranges.iter().all(WorkRange::is_empty));
    Ok(())
}

#[test]
fn test_crlf_and_short_rows() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("crlf.csv");
    std::fs::write(
        &path,
        "id,title,text\r\n1,t,\"abcabc\"\r\n2,only-two\r\n3,t,abc\r\n",
    )?;

    let corpus = load_corpus(&path, &Default::default())?;
    assert_eq!(corpus.len(), 3);
    assert_eq!(corpus.null_count(), 1);

    let mut config = ScanConfig::new(&path, "abc");
    config.group_size = ranks(2);
    assert_eq!(patscan::run(&config)?.total_matches, 3);
    Ok(())
}
