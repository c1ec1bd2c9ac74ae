//! Bridge traffic counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the session and dispatcher.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub frames_received: AtomicU64,
    pub checksum_errors: AtomicU64,
    pub commands_sent: AtomicU64,
    pub command_timeouts: AtomicU64,
    pub connects_total: AtomicU64,
    pub disconnects_total: AtomicU64,
}

impl BridgeStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            command_timeouts: self.command_timeouts.load(Ordering::Relaxed),
            connects_total: self.connects_total.load(Ordering::Relaxed),
            disconnects_total: self.disconnects_total.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub checksum_errors: u64,
    pub commands_sent: u64,
    pub command_timeouts: u64,
    pub connects_total: u64,
    pub disconnects_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = BridgeStats::default();
        BridgeStats::incr(&stats.commands_sent);
        BridgeStats::incr(&stats.commands_sent);
        BridgeStats::incr(&stats.checksum_errors);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.commands_sent, 2);
        assert_eq!(snapshot.checksum_errors, 1);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["commands_sent"], 2);
        assert_eq!(json["frames_received"], 0);
    }
}
