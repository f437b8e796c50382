//! Lock-free batch statistics using atomic operations
//!
//! Tracks how many sessions of a batch sit in each life-cycle state without
//! mutex contention, plus the running-count high-water mark.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::SessionState;

/// Per-batch session counters.
#[derive(Debug)]
pub struct BatchStats {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    peak_running: AtomicU64,
}

impl BatchStats {
    /// Create counters for a batch of `total` queued sessions.
    pub fn new(total: u64) -> Self {
        Self {
            queued: AtomicU64::new(total),
            running: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            peak_running: AtomicU64::new(0),
        }
    }

    /// A queued session was dispatched and is now running.
    pub fn mark_running(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
        let now = self.running.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_running.fetch_max(now, Ordering::Relaxed);
    }

    /// A running session reached the given terminal state.
    pub fn finish_running(&self, state: SessionState) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        match state {
            SessionState::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            SessionState::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            SessionState::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            // Non-terminal states never leave Running this way.
            SessionState::Queued | SessionState::Running => 0,
        };
    }

    /// A queued session was cancelled without ever being dispatched.
    pub fn cancel_queued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn running(&self) -> u64 {
        self.running.load(Ordering::Relaxed)
    }

    pub fn peak_running(&self) -> u64 {
        self.peak_running.load(Ordering::Relaxed)
    }

    /// True once no session is queued or running.
    pub fn is_settled(&self) -> bool {
        self.queued() == 0 && self.running() == 0
    }

    /// Get snapshot for serialization.
    pub fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of batch stats.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatsSnapshot {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub peak_running: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_counting() {
        let stats = BatchStats::new(3);
        assert_eq!(stats.queued(), 3);
        assert!(!stats.is_settled());

        stats.mark_running();
        stats.mark_running();
        assert_eq!(stats.running(), 2);
        assert_eq!(stats.peak_running(), 2);

        stats.finish_running(SessionState::Completed);
        stats.finish_running(SessionState::Failed);
        stats.cancel_queued();

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cancelled, 1);
        assert_eq!(snap.peak_running, 2);
        assert!(stats.is_settled());
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let stats = BatchStats::new(2);
        stats.mark_running();
        stats.finish_running(SessionState::Completed);
        stats.mark_running();
        stats.finish_running(SessionState::Completed);
        assert_eq!(stats.peak_running(), 1);
    }
}
