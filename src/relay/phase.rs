use super::stats::RelayStats;
use crate::error::{RelayError, UpstreamError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of one analyze request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Validating,
    Rejected,
    Upstreaming,
    Streaming,
    Completed,
    StreamError,
}

impl RequestPhase {
    pub fn can_transition_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Upstreaming)
                | (Upstreaming, Rejected)
                | (Upstreaming, Streaming)
                | (Streaming, Completed)
                | (Streaming, StreamError)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestPhase::Rejected | RequestPhase::Completed | RequestPhase::StreamError
        )
    }
}

/// Drives a request through its phases and keeps the relay counters honest.
///
/// Dropped while still `Streaming` means the client went away before the
/// upstream answer finished.
pub struct PhaseTracker {
    request_id: Uuid,
    phase: RequestPhase,
    stats: Arc<RelayStats>,
    started: Instant,
    fragments: u64,
    bytes: u64,
}

impl PhaseTracker {
    pub fn new(request_id: Uuid, stats: Arc<RelayStats>) -> Self {
        stats.requests.fetch_add(1, Ordering::Relaxed);
        Self {
            request_id,
            phase: RequestPhase::Idle,
            stats,
            started: Instant::now(),
            fragments: 0,
            bytes: 0,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Move to `next`; illegal transitions are refused and logged
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(
                "Request {} refused phase change {:?} -> {:?}",
                self.request_id, self.phase, next
            );
            return false;
        }

        debug!(
            "Request {} phase {:?} -> {:?}",
            self.request_id, self.phase, next
        );
        self.phase = next;
        true
    }

    /// Terminate before any byte was streamed
    pub fn reject(&mut self, error: &RelayError) {
        if !self.advance(RequestPhase::Rejected) {
            return;
        }

        match error {
            RelayError::Upstream(_) => {
                self.stats.upstream_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Request {} failed upstream before streaming: {}",
                    self.request_id, error
                );
            }
            _ => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Request {} rejected ({}): {}",
                    self.request_id,
                    error.category(),
                    error
                );
            }
        }
    }

    pub fn record_fragment(&mut self, len: usize) {
        self.fragments += 1;
        self.bytes += len as u64;
        self.stats.record_fragment(len);
    }

    pub fn complete(&mut self) {
        if self.advance(RequestPhase::Completed) {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                "Request {} completed: {} fragments, {} bytes in {:?}",
                self.request_id,
                self.fragments,
                self.bytes,
                self.started.elapsed()
            );
        }
    }

    pub fn fail(&mut self, error: &UpstreamError) {
        if self.advance(RequestPhase::StreamError) {
            self.stats.stream_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Request {} interrupted after {} fragments: {}",
                self.request_id, self.fragments, error
            );
        }
    }
}

impl Drop for PhaseTracker {
    fn drop(&mut self) {
        if self.phase == RequestPhase::Streaming {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            info!(
                "Request {} abandoned by client after {} fragments",
                self.request_id, self.fragments
            );
        }
    }
}
