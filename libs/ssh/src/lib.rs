//! SSH transport for socktun.
//!
//! [`SshTransport`] implements [`socktun_transport::Transport`] over one
//! authenticated `russh` client session. Host keys are checked according to a
//! [`HostKeyPolicy`]; verification is only skipped when explicitly configured.

mod error;
mod host_key;
mod transport;

pub use error::SshError;
pub use host_key::HostKeyPolicy;
pub use transport::{SshConfig, SshTransport, DEFAULT_HANDSHAKE_TIMEOUT};
