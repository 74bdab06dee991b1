//! A fixed-size group of ranks that cooperate only through blocking
//! collectives.
//!
//! Everything above this module is written against [`Collectives`]. Two
//! backends implement it:
//!
//! - [`Communicator`], the default in-process group launched by
//!   [`ProcessGroup`];
//! - `MpiCommunicator` (feature `mpi`), one MPI process per rank started by
//!   `mpirun`.
//!
//! In the in-process group every rank runs on its own named OS thread
//! (`rank-<i>`) and owns its [`Communicator`]. Ranks never share data: the
//! only link between them is a set of channels carrying owned byte buffers.
//! A rank blocked in a collective waits until every peer issues the matching
//! call, so a dedicated thread per rank is required; a work-stealing pool
//! with fewer threads than ranks would deadlock.
//!
//! ```rust,ignore
//! let group = ProcessGroup::new(NonZeroUsize::new(4).unwrap());
//! let outcomes = group.launch(|comm| {
//!     let n = comm.broadcast_u64(if comm.is_root() { 42 } else { 0 })?;
//!     comm.reduce_sum(n)
//! })?;
//! ```
pub mod communicator;
#[cfg(feature = "mpi")]
pub mod mpi_backend;

pub use communicator::Communicator;
#[cfg(feature = "mpi")]
pub use mpi_backend::MpiCommunicator;

use crossbeam::channel::unbounded;
use std::num::NonZeroUsize;
use std::thread;
use tracing::{debug, info_span};

use crate::errors::{ScanError, ScanResult};
use crate::metrics::TransferMetrics;

/// Rank that roots every collective
pub const ROOT: usize = 0;

/// Blocking collectives over a fixed group of ranks.
///
/// Every rank must issue the same collectives in the same order. Rooted
/// operations are rooted at [`ROOT`]; arguments that only matter on the root
/// are ignored elsewhere, and results that only exist on the root are `None`
/// on the other ranks.
pub trait Collectives {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Sends the root's `data` to every rank; every rank gets its own copy
    fn broadcast(&mut self, data: Vec<u8>) -> ScanResult<Vec<u8>>;

    fn broadcast_u64(&mut self, value: u64) -> ScanResult<u64> {
        let bytes = self.broadcast(value.to_le_bytes().to_vec())?;
        decode_u64(&bytes)
    }

    /// Blocks until every rank has entered the barrier
    fn barrier(&mut self) -> ScanResult<()>;

    /// Hands block `r` of the root's `blocks` to rank `r`
    fn scatter(&mut self, blocks: Vec<Vec<u8>>) -> ScanResult<Vec<u8>>;

    /// Collects one block from every rank at the root, in rank order
    fn gather(&mut self, block: Vec<u8>) -> ScanResult<Option<Vec<Vec<u8>>>>;

    /// Sums one value from every rank at the root
    fn reduce_sum(&mut self, value: u64) -> ScanResult<Option<u64>>;

    /// Tears the whole group down so no rank stays blocked
    fn abort(&mut self, reason: &str);
}

/// Decodes a little-endian `u64` scalar
pub fn decode_u64(bytes: &[u8]) -> ScanResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        ScanError::protocol(format!("expected 8-byte scalar, got {} bytes", bytes.len()))
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// Launches ranks and wires their communicators
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    size: NonZeroUsize,
    metrics: TransferMetrics,
}

impl ProcessGroup {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size,
            metrics: TransferMetrics::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    /// Builds one communicator per rank, in rank order
    pub fn communicators(&self) -> Vec<Communicator> {
        let size = self.size();
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                let peers = (0..size)
                    .map(|peer| {
                        let linked = if rank == ROOT {
                            peer != ROOT
                        } else {
                            peer == ROOT
                        };
                        linked.then(|| senders[peer].clone())
                    })
                    .collect();
                Communicator::new(rank, size, inbox, peers, self.metrics.clone())
            })
            .collect()
    }

    /// Runs `body` once on every rank and collects each rank's result in rank
    /// order.
    ///
    /// A rank whose body fails with a local error aborts the group, so the
    /// remaining ranks return [`ScanError::Aborted`] instead of blocking.
    pub fn launch<T, F>(&self, body: F) -> ScanResult<Vec<ScanResult<T>>>
    where
        T: Send,
        F: Fn(&mut Communicator) -> ScanResult<T> + Sync,
    {
        let body = &body;
        debug!("Launching process group of {} ranks", self.size());

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size());
            for mut comm in self.communicators() {
                let rank = comm.rank();
                let handle = thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let span = info_span!("rank", rank);
                        let _entered = span.enter();
                        let result = body(&mut comm);
                        match &result {
                            Ok(_) => comm.finalize(),
                            Err(err) if !err.is_group_teardown() => comm.abort(&err.to_string()),
                            Err(_) => {}
                        }
                        result
                    })?;
                handles.push(handle);
            }

            Ok(handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(ScanError::RankPanicked { rank }))
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(size: usize) -> ProcessGroup {
        ProcessGroup::new(NonZeroUsize::new(size).unwrap())
    }

    #[test]
    fn test_broadcast_reaches_every_rank() {
        let outcomes = group(4)
            .launch(|comm| {
                let data = if comm.is_root() {
                    b"hello".to_vec()
                } else {
                    Vec::new()
                };
                comm.broadcast(data)
            })
            .unwrap();
        for outcome in outcomes {
            assert_eq!(outcome.unwrap(), b"hello");
        }
    }

    #[test]
    fn test_reduce_sum_only_on_root() {
        let outcomes = group(5)
            .launch(|comm| comm.reduce_sum(comm.rank() as u64 + 1))
            .unwrap();
        let totals: Vec<Option<u64>> = outcomes.into_iter().map(Result::unwrap).collect();
        assert_eq!(totals, vec![Some(15), None, None, None, None]);
    }

    #[test]
    fn test_scatter_then_gather_preserves_order() {
        let outcomes = group(3)
            .launch(|comm| {
                let blocks = if comm.is_root() {
                    vec![vec![0], vec![1, 1], vec![2, 2, 2]]
                } else {
                    Vec::new()
                };
                let mine = comm.scatter(blocks)?;
                assert_eq!(mine.len(), comm.rank() + 1);
                comm.barrier()?;
                comm.gather(mine)
            })
            .unwrap();
        let gathered = outcomes.into_iter().next().unwrap().unwrap().unwrap();
        assert_eq!(gathered, vec![vec![0], vec![1, 1], vec![2, 2, 2]]);
    }

    #[test]
    fn test_early_messages_are_stashed() {
        // Workers race ahead from the gather into the reduce; the root must
        // still pair each message with the right collective.
        let outcomes = group(4)
            .launch(|comm| {
                let gathered = comm.gather(vec![comm.rank() as u8])?;
                let total = comm.reduce_sum(10)?;
                Ok((gathered, total))
            })
            .unwrap();
        let (gathered, total) = outcomes.into_iter().next().unwrap().unwrap();
        assert_eq!(gathered.unwrap(), vec![vec![0], vec![1], vec![2], vec![3]]);
        assert_eq!(total, Some(40));
    }

    #[test]
    fn test_root_failure_aborts_workers() {
        let outcomes = group(3)
            .launch(|comm| {
                if comm.is_root() {
                    return Err(ScanError::config_error("root gave up"));
                }
                comm.broadcast(Vec::new())
            })
            .unwrap();
        assert!(matches!(outcomes[0], Err(ScanError::ConfigError(_))));
        for outcome in &outcomes[1..] {
            assert!(matches!(outcome, Err(ScanError::Aborted { .. })));
        }
    }

    #[test]
    fn test_worker_failure_is_relayed_to_peers() {
        let outcomes = group(3)
            .launch(|comm| {
                if comm.rank() == 2 {
                    return Err(ScanError::protocol("bad frame"));
                }
                comm.barrier()
            })
            .unwrap();
        assert!(matches!(outcomes[0], Err(ScanError::Aborted { .. })));
        assert!(matches!(outcomes[1], Err(ScanError::Aborted { .. })));
        assert!(matches!(outcomes[2], Err(ScanError::Protocol(_))));
    }

    #[test]
    fn test_single_rank_group() {
        let outcomes = group(1)
            .launch(|comm| {
                let n = comm.broadcast_u64(7)?;
                comm.barrier()?;
                comm.reduce_sum(n)
            })
            .unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap(), &Some(7));
    }

    #[test]
    fn test_metrics_count_traffic() {
        let g = group(3);
        g.launch(|comm| comm.broadcast(vec![0u8; 16])).unwrap();
        let stats = g.metrics().get_stats();
        // Root sends one 16-byte copy to each of the two workers
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 32);
        assert_eq!(stats.collectives, 3);
    }
}
