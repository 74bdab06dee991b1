use crate::errors::ScanResult;
use crate::group::Collectives;

/// Reduces every rank's partial count into the coordinator's total.
///
/// Returns `Some(total)` on the coordinator and `None` on workers. Addition is
/// commutative and associative, so the total does not depend on the order in
/// which partials arrive.
pub fn aggregate<C: Collectives>(comm: &mut C, partial: u64) -> ScanResult<Option<u64>> {
    comm.reduce_sum(partial)
}

/// Sums partial counts computed within one process
pub fn sum_partials<I: IntoIterator<Item = u64>>(partials: I) -> u64 {
    partials.into_iter().sum()
}
