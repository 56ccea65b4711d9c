//! Counters for monitoring sessions and the service.
//!
//! Counters are atomics so the pipelines and request handlers never take a
//! lock to record progress. Read them through `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Client-side session statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Commands acknowledged by the service
    pub commands_sent: u64,
    /// Failed send attempts, retries included
    pub send_failures: u64,
    pub polls: u64,
    pub poll_failures: u64,
    /// Remote commands applied to the local store
    pub commands_applied: u64,
    /// Own commands skipped on the way back in
    pub echoes_skipped: u64,
    /// Time spent unable to reach the service, current outage included
    pub total_disconnected: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicSyncStats {
    pub commands_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub polls: AtomicU64,
    pub poll_failures: AtomicU64,
    pub commands_applied: AtomicU64,
    pub echoes_skipped: AtomicU64,
}

impl AtomicSyncStats {
    pub fn snapshot(&self, total_disconnected: Duration) -> SyncStats {
        SyncStats {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            echoes_skipped: self.echoes_skipped.load(Ordering::Relaxed),
            total_disconnected,
        }
    }
}

/// Service-side statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// WebSocket connections accepted since start
    pub connections: u64,
    pub requests: u64,
    pub commands_appended: u64,
    /// Rows flagged ineffective by compaction
    pub commands_compacted: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicServerStats {
    pub connections: AtomicU64,
    pub requests: AtomicU64,
    pub commands_appended: AtomicU64,
    pub commands_compacted: AtomicU64,
}

impl AtomicServerStats {
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            commands_appended: self.commands_appended.load(Ordering::Relaxed),
            commands_compacted: self.commands_compacted.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Picks the log level for a pipeline failure: `warn` for the first one
/// after a success, `debug` while the failures continue.
#[derive(Debug, Default)]
pub(crate) struct FailureStreak {
    failing: bool,
}

impl FailureStreak {
    pub fn succeeded(&mut self) {
        self.failing = false;
    }

    pub fn failed(&mut self) -> log::Level {
        let level = if self.failing {
            log::Level::Debug
        } else {
            log::Level::Warn
        };
        self.failing = true;
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_first_failure_in_a_streak_warns() {
        let mut streak = FailureStreak::default();
        assert_eq!(streak.failed(), log::Level::Warn);
        assert_eq!(streak.failed(), log::Level::Debug);
        assert_eq!(streak.failed(), log::Level::Debug);
        streak.succeeded();
        assert_eq!(streak.failed(), log::Level::Warn);
    }

    #[test]
    fn test_sync_stats_snapshot() {
        let stats = AtomicSyncStats::default();
        bump(&stats.polls);
        bump(&stats.polls);
        bump(&stats.poll_failures);
        let snapshot = stats.snapshot(Duration::from_secs(3));
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.poll_failures, 1);
        assert_eq!(snapshot.total_disconnected, Duration::from_secs(3));
    }
}
