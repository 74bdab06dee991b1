use crossbeam::channel::{Receiver, Sender};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

use super::{decode_u64, Collectives, ROOT};
use crate::errors::{ScanError, ScanResult};
use crate::metrics::TransferMetrics;

#[derive(Debug)]
pub(crate) enum Payload {
    Data(Vec<u8>),
    Abort(String),
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) from: usize,
    pub(crate) seq: u64,
    pub(crate) payload: Payload,
}

/// One rank's endpoint in a process group.
///
/// Collectives are blocking and must be issued in the same order by every
/// rank. The topology is a star rooted at [`ROOT`]: the root can reach every
/// worker, a worker can reach only the root. Each message carries the
/// sequence number of its collective, so a message that arrives early is
/// stashed until the matching collective runs.
///
/// Buffers handed to a collective are copied per recipient; no two ranks ever
/// hold the same allocation.
#[derive(Debug)]
pub struct Communicator {
    rank: usize,
    size: usize,
    inbox: Receiver<Envelope>,
    peers: Vec<Option<Sender<Envelope>>>,
    seq: u64,
    stash: HashMap<(u64, usize), Vec<u8>>,
    metrics: TransferMetrics,
    finalized: bool,
}

impl Communicator {
    pub(crate) fn new(
        rank: usize,
        size: usize,
        inbox: Receiver<Envelope>,
        peers: Vec<Option<Sender<Envelope>>>,
        metrics: TransferMetrics,
    ) -> Self {
        Self {
            rank,
            size,
            inbox,
            peers,
            seq: 0,
            stash: HashMap::new(),
            metrics,
            finalized: false,
        }
    }

    /// Marks a clean exit; dropping an unfinalized communicator aborts the group
    pub fn finalize(&mut self) {
        debug!("Rank {} finalized after {} collectives", self.rank, self.seq);
        self.finalized = true;
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn workers(&self) -> std::ops::Range<usize> {
        1..self.size
    }

    fn reachable(&self) -> Vec<usize> {
        self.peers
            .iter()
            .enumerate()
            .filter_map(|(rank, peer)| peer.as_ref().map(|_| rank))
            .collect()
    }

    fn send(&self, to: usize, seq: u64, data: Vec<u8>) -> ScanResult<()> {
        let peer = self
            .peers
            .get(to)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                ScanError::protocol(format!("rank {} has no link to rank {}", self.rank, to))
            })?;
        let bytes = data.len() as u64;
        peer.send(Envelope {
            from: self.rank,
            seq,
            payload: Payload::Data(data),
        })
        .map_err(|_| ScanError::Disconnected { rank: to })?;
        self.metrics.record_message(bytes);
        trace!("Rank {} -> {} seq {}: {} bytes", self.rank, to, seq, bytes);
        Ok(())
    }

    fn send_abort(&self, to: usize, reason: &str) {
        if let Some(Some(peer)) = self.peers.get(to) {
            let _ = peer.send(Envelope {
                from: self.rank,
                seq: self.seq,
                payload: Payload::Abort(reason.to_string()),
            });
        }
    }

    fn recv(&mut self, from: usize, seq: u64) -> ScanResult<Vec<u8>> {
        if let Some(data) = self.stash.remove(&(seq, from)) {
            return Ok(data);
        }
        loop {
            let envelope = self
                .inbox
                .recv()
                .map_err(|_| ScanError::Disconnected { rank: from })?;
            match envelope.payload {
                Payload::Abort(reason) => {
                    self.metrics.record_abort();
                    if self.is_root() {
                        let sender = envelope.from;
                        for peer in self.workers().filter(|&peer| peer != sender) {
                            self.send_abort(peer, &reason);
                        }
                    }
                    self.finalized = true;
                    return Err(ScanError::aborted(reason));
                }
                Payload::Data(data) if envelope.from == from && envelope.seq == seq => {
                    return Ok(data);
                }
                Payload::Data(data) => {
                    trace!(
                        "Rank {} stashing early message from {} seq {}",
                        self.rank,
                        envelope.from,
                        envelope.seq
                    );
                    self.stash.insert((envelope.seq, envelope.from), data);
                }
            }
        }
    }
}

impl Collectives for Communicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&mut self, data: Vec<u8>) -> ScanResult<Vec<u8>> {
        let seq = self.next_seq();
        let out = if self.is_root() {
            for peer in self.workers() {
                self.send(peer, seq, data.clone())?;
            }
            data
        } else {
            self.recv(ROOT, seq)?
        };
        self.metrics.record_collective();
        Ok(out)
    }

    fn barrier(&mut self) -> ScanResult<()> {
        let seq = self.next_seq();
        if self.is_root() {
            for peer in self.workers() {
                self.recv(peer, seq)?;
            }
            for peer in self.workers() {
                self.send(peer, seq, Vec::new())?;
            }
        } else {
            self.send(ROOT, seq, Vec::new())?;
            self.recv(ROOT, seq)?;
        }
        self.metrics.record_collective();
        Ok(())
    }

    /// The root must supply exactly one block per rank; a wrong count aborts
    /// the group before anything is sent.
    fn scatter(&mut self, blocks: Vec<Vec<u8>>) -> ScanResult<Vec<u8>> {
        let seq = self.next_seq();
        let own = if self.is_root() {
            if blocks.len() != self.size {
                // Release the workers before reporting the local mistake
                let reason = format!(
                    "scatter needs {} blocks, root supplied {}",
                    self.size,
                    blocks.len()
                );
                self.abort(&reason);
                return Err(ScanError::protocol(reason));
            }
            let mut blocks = blocks.into_iter();
            let own = blocks.next().unwrap_or_default();
            for (peer, block) in (1..self.size).zip(blocks) {
                self.send(peer, seq, block)?;
            }
            own
        } else {
            self.recv(ROOT, seq)?
        };
        self.metrics.record_collective();
        Ok(own)
    }

    fn gather(&mut self, block: Vec<u8>) -> ScanResult<Option<Vec<Vec<u8>>>> {
        let seq = self.next_seq();
        let out = if self.is_root() {
            let mut blocks = Vec::with_capacity(self.size);
            blocks.push(block);
            for peer in self.workers() {
                blocks.push(self.recv(peer, seq)?);
            }
            Some(blocks)
        } else {
            self.send(ROOT, seq, block)?;
            None
        };
        self.metrics.record_collective();
        Ok(out)
    }

    // Built on gather: the root decodes and sums the workers' scalars
    fn reduce_sum(&mut self, value: u64) -> ScanResult<Option<u64>> {
        let gathered = self.gather(value.to_le_bytes().to_vec())?;
        gathered
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|bytes| decode_u64(bytes))
                    .sum::<ScanResult<u64>>()
            })
            .transpose()
    }

    /// The root notifies every worker; a worker notifies the root, which
    /// relays the abort to the remaining workers. Send failures are ignored
    /// since a peer that already exited needs no notice.
    fn abort(&mut self, reason: &str) {
        if self.finalized {
            return;
        }
        warn!("Rank {} aborting process group: {}", self.rank, reason);
        self.metrics.record_abort();
        let message = format!("rank {}: {}", self.rank, reason);
        for peer in self.reachable() {
            self.send_abort(peer, &message);
        }
        self.finalized = true;
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        if !self.finalized {
            let reason = if std::thread::panicking() {
                "rank panicked"
            } else {
                "rank exited without finalizing"
            };
            self.abort(reason);
        }
    }
}
