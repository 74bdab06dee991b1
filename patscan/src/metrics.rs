use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

/// Counts traffic moved through a process group.
///
/// Clones share the same counters, so every rank of a group can record into
/// one instance. Only counters are shared; payloads never are.
#[derive(Debug, Clone)]
pub struct TransferMetrics {
    messages_sent: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    collectives: Arc<AtomicU64>,
    aborts: Arc<AtomicU64>,
}

impl TransferMetrics {
    /// Creates a new TransferMetrics instance
    pub fn new() -> Self {
        Self {
            messages_sent: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            collectives: Arc::new(AtomicU64::new(0)),
            aborts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records one point-to-point message
    pub fn record_message(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        let total = self.bytes_sent.fetch_add(bytes, Ordering::Relaxed) + bytes;
        trace!("Message sent: {} bytes, total: {} bytes", bytes, total);
    }

    /// Records a collective completed by one rank
    pub fn record_collective(&self) {
        self.collectives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets current transfer statistics
    pub fn get_stats(&self) -> TransferStats {
        TransferStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            collectives: self.collectives.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }

    /// Logs current transfer statistics
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Transfer stats:\n\
             Messages sent: {}\n\
             Bytes sent: {}\n\
             Collectives completed (summed over ranks): {}\n\
             Aborts: {}",
            stats.messages_sent, stats.bytes_sent, stats.collectives, stats.aborts
        );
    }
}

impl Default for TransferMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`TransferMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub collectives: u64,
    pub aborts: u64,
}
