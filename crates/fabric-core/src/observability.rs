//! Routing statistics and the periodic summary log driven by
//! `routedMessagePrintIntervalS` (§6, supplemented from
//! `CcMessageRouter.cpp`'s print-statistics timer).

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Counters incremented by the dispatcher as messages move through it.
/// Cheap to update from multiple threads; read only by the periodic
/// summary log.
#[derive(Default)]
pub struct RoutingStats {
    routed: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
}

impl RoutingStats {
    pub fn record_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RoutingStatsSnapshot {
        RoutingStatsSnapshot {
            routed: self.routed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }

    /// Logs one summary line, matching the original's periodic print of
    /// routed/queued/dropped/retried counts. Callers drive this from the
    /// delayed scheduler at `routedMessagePrintIntervalS`.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        info!(
            routed = snapshot.routed,
            queued = snapshot.queued,
            dropped = snapshot.dropped,
            retried = snapshot.retried,
            "routing summary"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingStatsSnapshot {
    pub routed: u64,
    pub queued: u64,
    pub dropped: u64,
    pub retried: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = RoutingStats::default();
        stats.record_routed();
        stats.record_routed();
        stats.record_queued();
        stats.record_dropped();
        stats.record_retried();
        let snapshot = stats.snapshot();
        assert_eq!(
            snapshot,
            RoutingStatsSnapshot {
                routed: 2,
                queued: 1,
                dropped: 1,
                retried: 1,
            }
        );
    }
}
