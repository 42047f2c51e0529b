use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Relay counters, shared by every request handler
#[derive(Debug, Default)]
pub struct RelayStats {
    pub requests: AtomicU64,
    pub rejected: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub completed: AtomicU64,
    pub stream_errors: AtomicU64,
    pub abandoned: AtomicU64,
    pub fragments_forwarded: AtomicU64,
    pub bytes_forwarded: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fragment(&self, len: usize) {
        self.fragments_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            fragments_forwarded: self.fragments_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub requests: u64,
    pub rejected: u64,
    pub upstream_failures: u64,
    pub completed: u64,
    pub stream_errors: u64,
    pub abandoned: u64,
    pub fragments_forwarded: u64,
    pub bytes_forwarded: u64,
}
