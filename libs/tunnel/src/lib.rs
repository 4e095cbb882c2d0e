//! Transport supervision and dial multiplexing.
//!
//! One secure transport is shared by every proxied connection. This crate
//! keeps it honest:
//!
//! - [`LivenessSupervisor`] probes the transport on a fixed period and
//!   terminates it after too many consecutive failures
//! - [`Dialer`] opens streams through the transport for any number of
//!   concurrent callers, and fails fast once the transport is terminated
//! - [`GuardedStream`] makes every stream opened through a [`Dialer`] fail
//!   promptly when the transport is terminated
//!
//! ## Usage
//!
//! ```ignore
//! let transport = Arc::new(SshTransport::connect(ssh_config).await?);
//! let supervisor = LivenessSupervisor::spawn(Arc::clone(&transport), SupervisorConfig::default())?;
//! let dialer = Dialer::new(transport, supervisor.signal());
//!
//! let stream = dialer.dial(Network::Tcp, "10.0.0.5:80").await?;
//! ```

mod dialer;
mod error;
mod guard;
mod liveness;
mod supervisor;

pub use dialer::{Dial, DialStats, DialStatsSnapshot, Dialer};
pub use error::{ConfigError, DialError};
pub use guard::GuardedStream;
pub use liveness::{LivenessSignal, LivenessState, LivenessStatus};
pub use supervisor::{
    LivenessSupervisor, SupervisorConfig, SupervisorExit, SupervisorHandle, DEFAULT_INTERVAL,
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_PROBE_TIMEOUT,
};
