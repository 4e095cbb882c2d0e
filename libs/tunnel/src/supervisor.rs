//! Liveness supervisor for the shared transport.
//!
//! The supervisor probes the transport on a fixed period:
//! - an acknowledged probe resets the failure counter
//! - a failed or timed out probe increments it and is logged
//! - reaching the configured maximum terminates the transport for good
//!
//! Termination publishes the terminal state, fires the [`LivenessSignal`],
//! closes the transport, and ends the loop. It never restarts.

use std::sync::Arc;
use std::time::Duration;

use socktun_transport::{Transport, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::ConfigError;
use crate::liveness::{LivenessSignal, LivenessState, LivenessStatus};

/// Default probe period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on waiting for a probe acknowledgement.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of consecutive failures that terminates the transport.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Supervisor policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Time between probes. The first probe is sent one interval after start.
    pub interval: Duration,
    /// How long to wait for each acknowledgement.
    pub probe_timeout: Duration,
    /// Consecutive failures that terminate the transport.
    pub max_consecutive_failures: u32,
}

impl SupervisorConfig {
    pub fn new(interval: Duration, max_consecutive_failures: u32) -> Self {
        Self {
            interval,
            probe_timeout: DEFAULT_PROBE_TIMEOUT.min(interval),
            max_consecutive_failures,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "interval" });
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "probe_timeout",
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Why the supervisor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Too many consecutive probe failures.
    FailureThreshold { consecutive_failures: u32 },
    /// Stopped through [`SupervisorHandle::shutdown`].
    Shutdown,
    /// The supervisor task panicked or was aborted.
    Aborted,
}

/// Handle to a running supervisor.
pub struct SupervisorHandle {
    signal: Arc<LivenessSignal>,
    state_rx: watch::Receiver<LivenessState>,
    cancel: CancellationToken,
    join: JoinHandle<SupervisorExit>,
}

impl SupervisorHandle {
    /// Termination signal shared with dialers and streams.
    pub fn signal(&self) -> Arc<LivenessSignal> {
        Arc::clone(&self.signal)
    }

    /// Latest recorded liveness state.
    pub fn state(&self) -> LivenessState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to every recorded probe outcome.
    pub fn subscribe(&self) -> watch::Receiver<LivenessState> {
        self.state_rx.clone()
    }

    /// Whether the loop has already returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop, terminating and closing the transport if still active,
    /// and wait for it to return.
    ///
    /// If the loop already ended on its own, returns that exit reason.
    pub async fn shutdown(self) -> SupervisorExit {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the loop to return on its own.
    pub async fn wait(self) -> SupervisorExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Liveness supervisor task failed");
                self.signal.terminate();
                SupervisorExit::Aborted
            }
        }
    }
}

/// Background liveness loop over one transport.
pub struct LivenessSupervisor<T: Transport> {
    transport: Arc<T>,
    config: SupervisorConfig,
    signal: Arc<LivenessSignal>,
    state_tx: watch::Sender<LivenessState>,
    cancel: CancellationToken,
}

impl<T: Transport> LivenessSupervisor<T> {
    /// Validate `config` and start supervising `transport` on the current runtime.
    pub fn spawn(
        transport: Arc<T>,
        config: SupervisorConfig,
    ) -> Result<SupervisorHandle, ConfigError> {
        config.validate()?;

        let signal = Arc::new(LivenessSignal::new());
        let (state_tx, state_rx) = watch::channel(LivenessState::new());
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("liveness", transport = %transport.describe());

        let supervisor = Self {
            transport,
            config,
            signal: Arc::clone(&signal),
            state_tx,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(supervisor.run().instrument(span));

        Ok(SupervisorHandle {
            signal,
            state_rx,
            cancel,
            join,
        })
    }

    async fn run(self) -> SupervisorExit {
        let period = self.config.interval;
        let max_failures = self.config.max_consecutive_failures;
        let mut state = LivenessState::new();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = period.as_millis() as u64,
            probe_timeout_ms = self.config.probe_timeout.as_millis() as u64,
            max_failures,
            "Starting liveness supervisor"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stop(&mut state).await,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stop(&mut state).await,
                result = self.probe_once() => result,
            };

            let now = Instant::now();
            match result {
                Ok(()) => {
                    if state.consecutive_failures() > 0 {
                        info!(
                            previous_failures = state.consecutive_failures(),
                            "Liveness probe recovered"
                        );
                    } else {
                        debug!("Liveness probe acknowledged");
                    }
                    state.record_success(now);
                }
                Err(e) => {
                    let status = state.record_failure(now, max_failures);
                    warn!(
                        error = %e,
                        reason = e.reason_code(),
                        consecutive_failures = state.consecutive_failures(),
                        max_failures,
                        "Liveness probe failed"
                    );

                    if status == LivenessStatus::Terminated {
                        error!(
                            consecutive_failures = state.consecutive_failures(),
                            "Max liveness failures reached, closing transport"
                        );
                        self.terminate(&state).await;
                        return SupervisorExit::FailureThreshold {
                            consecutive_failures: state.consecutive_failures(),
                        };
                    }
                }
            }

            self.state_tx.send_replace(state.clone());
        }
    }

    /// Send one probe, bounded by the probe timeout.
    async fn probe_once(&self) -> Result<(), TransportError> {
        if self.transport.is_closed() {
            return Err(TransportError::Closed);
        }
        match tokio::time::timeout(self.config.probe_timeout, self.transport.probe()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut),
        }
    }

    async fn stop(&self, state: &mut LivenessState) -> SupervisorExit {
        info!("Liveness supervisor shutting down");
        state.terminate();
        self.terminate(state).await;
        SupervisorExit::Shutdown
    }

    /// Publish the terminal state, fail new dials, then close the transport.
    async fn terminate(&self, state: &LivenessState) {
        self.state_tx.send_replace(state.clone());
        self.signal.terminate();
        self.transport.close().await;
        info!("Transport closed");
    }
}
