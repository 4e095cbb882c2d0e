//! Liveness bookkeeping for one transport.
//!
//! [`LivenessState`] is owned by the supervisor task and is the only place the
//! failure counter changes. [`LivenessSignal`] publishes the one bit everyone
//! else needs (has the transport been terminated?) together with a
//! cancellation token that fires exactly once, on termination.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Status of a transport as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    /// Probes are being sent; the transport may be used.
    Active,
    /// The transport has been closed for good.
    Terminated,
}

/// Failure counter and status, mutated only by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessState {
    consecutive_failures: u32,
    last_probe_at: Option<Instant>,
    status: LivenessStatus,
}

impl LivenessState {
    /// Fresh state: active, no failures, never probed.
    pub fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_probe_at: None,
            status: LivenessStatus::Active,
        }
    }

    /// Failures since the last acknowledged probe.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// When the last probe outcome was recorded.
    pub fn last_probe_at(&self) -> Option<Instant> {
        self.last_probe_at
    }

    pub fn status(&self) -> LivenessStatus {
        self.status
    }

    pub fn is_terminated(&self) -> bool {
        self.status == LivenessStatus::Terminated
    }

    /// Record an acknowledged probe. Resets the counter.
    pub fn record_success(&mut self, at: Instant) -> LivenessStatus {
        if self.is_terminated() {
            return self.status;
        }
        self.consecutive_failures = 0;
        self.last_probe_at = Some(at);
        self.status
    }

    /// Record a failed probe. Terminates once `max_failures` consecutive
    /// failures have been seen.
    pub fn record_failure(&mut self, at: Instant, max_failures: u32) -> LivenessStatus {
        if self.is_terminated() {
            return self.status;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_probe_at = Some(at);
        if self.consecutive_failures >= max_failures {
            self.status = LivenessStatus::Terminated;
        }
        self.status
    }

    /// Force the terminal status (explicit shutdown).
    pub(crate) fn terminate(&mut self) {
        self.status = LivenessStatus::Terminated;
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, read-mostly view of a transport's liveness.
///
/// Written once, by the supervisor, when the transport is terminated.
#[derive(Debug)]
pub struct LivenessSignal {
    terminated: AtomicBool,
    token: CancellationToken,
}

impl LivenessSignal {
    pub fn new() -> Self {
        Self {
            terminated: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> LivenessStatus {
        if self.is_terminated() {
            LivenessStatus::Terminated
        } else {
            LivenessStatus::Active
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Wait until the transport is terminated.
    pub async fn terminated(&self) {
        self.token.cancelled().await
    }

    /// Token cancelled on termination. Cancelling it from outside has no
    /// effect on the status; only the supervisor terminates.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Mark the transport terminated. Returns `true` for the call that made
    /// the transition.
    pub(crate) fn terminate(&self) -> bool {
        let first = !self.terminated.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }
}

impl Default for LivenessSignal {
    fn default() -> Self {
        Self::new()
    }
}
