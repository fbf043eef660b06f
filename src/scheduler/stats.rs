use crate::peer::FailureKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by `submit` and every worker.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub(super) submitted: AtomicU64,
    pub(super) started: AtomicU64,
    pub(super) queued: AtomicU64,
    pub(super) dropped_full: AtomicU64,
    pub(super) duplicates: AtomicU64,
    pub(super) blacklisted: AtomicU64,
    pub(super) completed: AtomicU64,
    pub(super) discarded: AtomicU64,
    failed_decode: AtomicU64,
    failed_protocol: AtomicU64,
    failed_timeout: AtomicU64,
    failed_validation: AtomicU64,
    failed_network: AtomicU64,
    aborted: AtomicU64,
}

/// A point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub queued: u64,
    /// Announces dropped because both the workers and the queue were full.
    pub dropped_full: u64,
    pub duplicates: u64,
    pub blacklisted: u64,
    /// Sessions that produced a record.
    pub completed: u64,
    /// Verified metadata that did not map to a record.
    pub discarded: u64,
    pub failed_decode: u64,
    pub failed_protocol: u64,
    pub failed_timeout: u64,
    pub failed_validation: u64,
    pub failed_network: u64,
    pub aborted: u64,
    pub active: usize,
    pub queue_len: usize,
}

impl StatsSnapshot {
    /// Sessions that have ended, whatever the outcome.
    pub fn finished(&self) -> u64 {
        self.completed
            + self.discarded
            + self.failed_decode
            + self.failed_protocol
            + self.failed_timeout
            + self.failed_validation
            + self.failed_network
            + self.aborted
    }
}

impl SchedulerStats {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_failure(&self, kind: FailureKind) {
        let counter = match kind {
            FailureKind::Decode => &self.failed_decode,
            FailureKind::Protocol => &self.failed_protocol,
            FailureKind::Timeout => &self.failed_timeout,
            FailureKind::Validation => &self.failed_validation,
            FailureKind::Network => &self.failed_network,
            FailureKind::Aborted => &self.aborted,
        };
        Self::bump(counter);
    }

    pub(super) fn snapshot(&self, active: usize, queue_len: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            submitted: load(&self.submitted),
            started: load(&self.started),
            queued: load(&self.queued),
            dropped_full: load(&self.dropped_full),
            duplicates: load(&self.duplicates),
            blacklisted: load(&self.blacklisted),
            completed: load(&self.completed),
            discarded: load(&self.discarded),
            failed_decode: load(&self.failed_decode),
            failed_protocol: load(&self.failed_protocol),
            failed_timeout: load(&self.failed_timeout),
            failed_validation: load(&self.failed_validation),
            failed_network: load(&self.failed_network),
            aborted: load(&self.aborted),
            active,
            queue_len,
        }
    }
}
