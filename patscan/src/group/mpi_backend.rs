//! [`Collectives`] over an MPI world communicator.
//!
//! Launch one process per rank with `mpirun -n <N> patscan --mode mpi ...`.
//! Variable-length payloads move in two steps: the lengths first, as
//! fixed-size scalars, then the bytes with the `varcount` collectives.
//! MPI's default error handler aborts the job on a failed call, so the
//! collectives here only fail on lengths MPI cannot express.
use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::{Count, Rank};
use tracing::error;

use super::{Collectives, ROOT};
use crate::errors::{ScanError, ScanResult};

/// Exit code handed to `MPI_Abort`
const ABORT_CODE: i32 = 1;

/// One MPI process's endpoint in the world communicator
pub struct MpiCommunicator {
    world: SimpleCommunicator,
}

impl MpiCommunicator {
    pub fn new(world: SimpleCommunicator) -> Self {
        Self { world }
    }
}

impl Collectives for MpiCommunicator {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn broadcast(&mut self, mut data: Vec<u8>) -> ScanResult<Vec<u8>> {
        let len = self.broadcast_u64(data.len() as u64)?;
        data.resize(to_len(len)?, 0);
        self.world
            .process_at_rank(ROOT as Rank)
            .broadcast_into(&mut data[..]);
        Ok(data)
    }

    fn broadcast_u64(&mut self, value: u64) -> ScanResult<u64> {
        let mut value = value;
        self.world
            .process_at_rank(ROOT as Rank)
            .broadcast_into(&mut value);
        Ok(value)
    }

    fn barrier(&mut self) -> ScanResult<()> {
        self.world.barrier();
        Ok(())
    }

    fn scatter(&mut self, blocks: Vec<Vec<u8>>) -> ScanResult<Vec<u8>> {
        if self.is_root() && blocks.len() != self.size() {
            let reason = format!(
                "scatter needs {} blocks, root supplied {}",
                self.size(),
                blocks.len()
            );
            self.abort(&reason);
        }
        let root = self.world.process_at_rank(ROOT as Rank);
        let mut own_len: Count = 0;

        if self.is_root() {
            let counts = blocks
                .iter()
                .map(|block| to_count(block.len()))
                .collect::<ScanResult<Vec<Count>>>()?;
            root.scatter_into_root(&counts[..], &mut own_len);

            let displs = displacements(&counts);
            let flat = blocks.concat();
            let mut own = vec![0u8; own_len as usize];
            let partition = Partition::new(&flat[..], &counts[..], &displs[..]);
            root.scatter_varcount_into_root(&partition, &mut own[..]);
            Ok(own)
        } else {
            root.scatter_into(&mut own_len);
            let mut own = vec![0u8; own_len as usize];
            root.scatter_varcount_into(&mut own[..]);
            Ok(own)
        }
    }

    fn gather(&mut self, block: Vec<u8>) -> ScanResult<Option<Vec<Vec<u8>>>> {
        let root = self.world.process_at_rank(ROOT as Rank);
        let len = to_count(block.len())?;

        if !self.is_root() {
            root.gather_into(&len);
            root.gather_varcount_into(&block[..]);
            return Ok(None);
        }

        let mut counts: Vec<Count> = vec![0; self.size()];
        root.gather_into_root(&len, &mut counts[..]);
        let displs = displacements(&counts);
        let total = counts.iter().map(|&c| c as usize).sum();
        let mut flat = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
            root.gather_varcount_into_root(&block[..], &mut partition);
        }

        let mut blocks = Vec::with_capacity(counts.len());
        let mut rest = &flat[..];
        for &count in &counts {
            let (head, tail) = rest.split_at(count as usize);
            blocks.push(head.to_vec());
            rest = tail;
        }
        Ok(Some(blocks))
    }

    fn reduce_sum(&mut self, value: u64) -> ScanResult<Option<u64>> {
        let root = self.world.process_at_rank(ROOT as Rank);
        if self.is_root() {
            let mut total = 0u64;
            root.reduce_into_root(&value, &mut total, SystemOperation::sum());
            Ok(Some(total))
        } else {
            root.reduce_into(&value, SystemOperation::sum());
            Ok(None)
        }
    }

    fn abort(&mut self, reason: &str) {
        error!("Rank {} aborting MPI job: {}", self.rank(), reason);
        self.world.abort(ABORT_CODE)
    }
}

fn to_count(len: usize) -> ScanResult<Count> {
    Count::try_from(len)
        .map_err(|_| ScanError::protocol(format!("{} bytes exceed an MPI count", len)))
}

fn to_len(value: u64) -> ScanResult<usize> {
    usize::try_from(value)
        .map_err(|_| ScanError::protocol(format!("broadcast length {} overflows", value)))
}

/// Offsets of each block in the flattened buffer
fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let start = *offset;
            *offset += count;
            Some(start)
        })
        .collect()
}
