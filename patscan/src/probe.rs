//! Scatter/barrier/gather round trip over a synthetic identity array.
//!
//! Measures raw collective transfer cost apart from corpus distribution and
//! matching. When the array does not divide evenly across the group it is
//! padded with continuing identity values to the next multiple of the group
//! size; the padding is dropped again before verification.
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::{ScanError, ScanResult};
use crate::group::Collectives;

/// Number of `u32` elements moved by the default probe
pub const DEFAULT_PROBE_SIZE: usize = 1 << 20;

const ELEMENT: usize = std::mem::size_of::<u32>();

/// Result of one probe round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Time from the start of the scatter to the end of the gather
    pub elapsed: Duration,
    /// Elements per rank after padding
    pub block_len: usize,
    /// Padding elements appended to make the array divisible
    pub padding: usize,
}

/// Elements per rank for an array of `probe_size` spread over `group_size`
pub fn block_len(probe_size: usize, group_size: usize) -> usize {
    probe_size.div_ceil(group_size)
}

/// Checks that every padded index is representable as a `u32` value.
///
/// Returns the padded element count.
pub fn validate_probe_size(probe_size: usize, group_size: usize) -> ScanResult<usize> {
    let too_large = || {
        ScanError::config_error(format!(
            "probe size {} exceeds the u32 index space",
            probe_size
        ))
    };
    if group_size == 0 {
        return Err(ScanError::config_error("probe needs at least one rank"));
    }
    let padded = block_len(probe_size, group_size)
        .checked_mul(group_size)
        .ok_or_else(too_large)?;
    if padded > u32::MAX as usize + 1 {
        return Err(too_large());
    }
    Ok(padded)
}

/// Builds the identity array `0..padded` split into one block per rank
pub fn identity_blocks(probe_size: usize, group_size: usize) -> Vec<Vec<u8>> {
    let block = block_len(probe_size, group_size);
    (0..group_size)
        .map(|rank| {
            let start = rank * block;
            (start..start + block)
                .flat_map(|value| (value as u32).to_le_bytes())
                .collect()
        })
        .collect()
}

/// Runs the probe; every rank must call this with the same `probe_size`.
///
/// The coordinator verifies the gathered array after the clock stops and
/// discards it.
pub fn run_probe<C: Collectives>(comm: &mut C, probe_size: usize) -> ScanResult<ProbeOutcome> {
    let group_size = comm.size();
    if probe_size == 0 {
        return Ok(ProbeOutcome {
            elapsed: Duration::ZERO,
            block_len: 0,
            padding: 0,
        });
    }
    let padding = validate_probe_size(probe_size, group_size)? - probe_size;
    let block = block_len(probe_size, group_size);

    let blocks = if comm.is_root() {
        identity_blocks(probe_size, group_size)
    } else {
        Vec::new()
    };

    let started = Instant::now();
    let mine = comm.scatter(blocks)?;
    comm.barrier()?;
    let gathered = comm.gather(mine)?;
    let elapsed = started.elapsed();

    if let Some(gathered) = gathered {
        verify_round_trip(&gathered, probe_size)?;
    }
    debug!(
        "Probe moved {} elements ({} per rank, {} padding) in {}",
        probe_size,
        block,
        padding,
        humantime::format_duration(elapsed)
    );

    Ok(ProbeOutcome {
        elapsed,
        block_len: block,
        padding,
    })
}

/// Checks that the reassembled array is `0..probe_size` in order
pub fn verify_round_trip(blocks: &[Vec<u8>], probe_size: usize) -> ScanResult<()> {
    let values = blocks
        .iter()
        .flat_map(|block| block.chunks_exact(ELEMENT))
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));

    let mut seen = 0;
    for (index, found) in values.take(probe_size).enumerate() {
        let expected = index as u32;
        if found != expected {
            return Err(ScanError::ProbeMismatch {
                index,
                expected,
                found,
            });
        }
        seen += 1;
    }
    if seen != probe_size {
        return Err(ScanError::protocol(format!(
            "probe gathered {} of {} elements",
            seen, probe_size
        )));
    }
    Ok(())
}
