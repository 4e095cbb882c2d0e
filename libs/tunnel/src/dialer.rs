//! Concurrent dialing through the shared transport.
//!
//! Every dial is independent: the only shared read is the liveness status,
//! and the transport's own `open_stream` handles concurrent opens. Nothing
//! here serializes callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use socktun_transport::{AsyncStream, Network, Transport};
use tracing::{debug, warn};

use crate::error::DialError;
use crate::guard::GuardedStream;
use crate::liveness::LivenessSignal;

/// Outbound connection factory handed to front-ends.
#[async_trait]
pub trait Dial: Send + Sync + 'static {
    /// Stream type returned by a successful dial.
    type Stream: AsyncStream + 'static;

    /// Open a stream to `address` (`host:port`).
    async fn dial(&self, network: Network, address: &str) -> Result<Self::Stream, DialError>;
}

/// Dial counters.
#[derive(Debug, Default)]
pub struct DialStats {
    /// Dials requested.
    pub attempted: AtomicU64,
    /// Dials that returned a stream.
    pub succeeded: AtomicU64,
    /// Dials the transport failed.
    pub failed: AtomicU64,
    /// Dials refused because the transport was terminated.
    pub rejected_terminated: AtomicU64,
}

/// Point-in-time copy of [`DialStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialStatsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected_terminated: u64,
}

impl DialStats {
    pub fn snapshot(&self) -> DialStatsSnapshot {
        DialStatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_terminated: self.rejected_terminated.load(Ordering::Relaxed),
        }
    }
}

/// Dial multiplexer over one transport.
///
/// Cheap to clone; clones share the transport, the liveness signal and the
/// counters.
pub struct Dialer<T: Transport> {
    transport: Arc<T>,
    signal: Arc<LivenessSignal>,
    stats: Arc<DialStats>,
}

impl<T: Transport> Clone for Dialer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            signal: Arc::clone(&self.signal),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Transport> Dialer<T> {
    pub fn new(transport: Arc<T>, signal: Arc<LivenessSignal>) -> Self {
        Self {
            transport,
            signal,
            stats: Arc::new(DialStats::default()),
        }
    }

    pub fn stats(&self) -> &DialStats {
        &self.stats
    }

    /// Whether dials are currently forwarded to the transport.
    pub fn is_available(&self) -> bool {
        !self.signal.is_terminated()
    }

    /// Open a stream through the transport.
    ///
    /// Fails with [`DialError::TransportUnavailable`] without touching the
    /// transport once it has been terminated. Transport errors are returned
    /// as-is.
    pub async fn dial(&self, network: Network, address: &str) -> Result<GuardedStream, DialError> {
        self.stats.attempted.fetch_add(1, Ordering::Relaxed);

        if self.signal.is_terminated() {
            self.stats
                .rejected_terminated
                .fetch_add(1, Ordering::Relaxed);
            debug!(network = %network, address, "Dial refused: transport terminated");
            return Err(DialError::TransportUnavailable);
        }

        match self.transport.open_stream(network, address).await {
            Ok(stream) => {
                // Terminated while the open was in flight.
                if self.signal.is_terminated() {
                    drop(stream);
                    self.stats
                .rejected_terminated
                .fetch_add(1, Ordering::Relaxed);
                    debug!(network = %network, address, "Dial dropped: transport terminated");
                    return Err(DialError::TransportUnavailable);
                }
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(network = %network, address, "Dial succeeded");
                Ok(GuardedStream::new(stream, self.signal.token()))
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                if e.is_transport_fatal() {
                    // Termination stays with the supervisor.
                    warn!(
                        network = %network,
                        address,
                        error = %e,
                        "Dial failed on an unusable transport"
                    );
                    return Err(DialError::Transport(e));
                }
                debug!(
                    network = %network,
                    address,
                    reason = e.reason_code(),
                    error = %e,
                    "Dial failed"
                );
                Err(DialError::Transport(e))
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Dial for Dialer<T> {
    type Stream = GuardedStream;

    async fn dial(&self, network: Network, address: &str) -> Result<GuardedStream, DialError> {
        Dialer::dial(self, network, address).await
    }
}
