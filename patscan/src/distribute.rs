//! One-time replication of the coordinator's corpus and pattern.
//!
//! The protocol is a fixed sequence of broadcasts that every rank walks in
//! the same order:
//!
//! 1. corpus size
//! 2. pattern length, then pattern bytes
//! 3. the records in index order, `frame_records` per frame
//!
//! Each worker decodes every frame into buffers it allocates itself, so after
//! the last frame every rank owns an independent, byte-identical corpus.
use std::num::NonZeroUsize;
use tracing::debug;

use crate::corpus::codec::{decode_frame, encode_frame};
use crate::corpus::Corpus;
use crate::errors::{ScanError, ScanResult};
use crate::group::Collectives;

/// A rank's private copy of the run inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub corpus: Corpus,
    pub pattern: Vec<u8>,
}

/// Replicates `source` from the root to every rank.
///
/// The root passes `Some((corpus, pattern))` and gets the same values back;
/// workers pass `None` and receive their copies.
pub fn distribute<C: Collectives>(
    comm: &mut C,
    source: Option<(Corpus, Vec<u8>)>,
    frame_records: NonZeroUsize,
) -> ScanResult<Replica> {
    if comm.is_root() {
        let (corpus, pattern) = source.ok_or_else(|| {
            ScanError::protocol("coordinator has no corpus to distribute")
        })?;
        send_replica(comm, corpus, pattern, frame_records.get())
    } else {
        receive_replica(comm, frame_records.get())
    }
}

fn send_replica<C: Collectives>(
    comm: &mut C,
    corpus: Corpus,
    pattern: Vec<u8>,
    frame_records: usize,
) -> ScanResult<Replica> {
    comm.broadcast_u64(corpus.len() as u64)?;
    comm.broadcast_u64(pattern.len() as u64)?;
    let pattern = comm.broadcast(pattern)?;

    let mut frames = 0;
    for chunk in corpus.records().chunks(frame_records) {
        comm.broadcast(encode_frame(chunk))?;
        frames += 1;
    }
    debug!(
        "Distributed {} records in {} frames to {} ranks",
        corpus.len(),
        frames,
        comm.size()
    );

    Ok(Replica { corpus, pattern })
}

fn receive_replica<C: Collectives>(comm: &mut C, frame_records: usize) -> ScanResult<Replica> {
    let corpus_size = to_usize(comm.broadcast_u64(0)?, "corpus size")?;
    let pattern_len = to_usize(comm.broadcast_u64(0)?, "pattern length")?;
    let pattern = comm.broadcast(Vec::new())?;
    if pattern.len() != pattern_len {
        return Err(ScanError::protocol(format!(
            "announced a {}-byte pattern but received {} bytes",
            pattern_len,
            pattern.len()
        )));
    }

    let mut records = Vec::with_capacity(corpus_size);
    while records.len() < corpus_size {
        let expected = frame_records.min(corpus_size - records.len());
        let frame = decode_frame(&comm.broadcast(Vec::new())?)?;
        if frame.len() != expected {
            return Err(ScanError::protocol(format!(
                "expected a frame of {} records, received {}",
                expected,
                frame.len()
            )));
        }
        records.extend(frame);
    }

    Ok(Replica {
        corpus: Corpus::from_records(records),
        pattern,
    })
}

fn to_usize(value: u64, field: &str) -> ScanResult<usize> {
    usize::try_from(value).map_err(|_| ScanError::protocol(format!("{} {} overflows", field, value)))
}
