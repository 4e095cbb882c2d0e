//! Secure transport contract.
//!
//! A transport is one established, authenticated session to a remote host.
//! It can:
//! - answer a liveness probe
//! - open logical byte streams to remote addresses, concurrently
//! - be closed, after which every operation fails with [`TransportError::Closed`]
//!
//! Implementations live in other crates (`socktun-ssh` for SSH, and
//! `socktun-testing` for the scripted fake used by tests).

mod error;
mod network;
mod stream;

use async_trait::async_trait;

pub use error::TransportError;
pub use network::{join_host_port, split_host_port, Network};
pub use stream::{AsyncStream, TransportStream};

/// Secure transport interface.
///
/// `open_stream` must be safe to call from many tasks at once; callers never
/// serialize around it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one liveness probe and wait for the peer's acknowledgement.
    ///
    /// Callers bound the wait with their own timeout.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Open a new stream to `address` (`host:port`) on the remote side.
    async fn open_stream(
        &self,
        network: Network,
        address: &str,
    ) -> Result<TransportStream, TransportError>;

    /// Close the transport. Idempotent.
    async fn close(&self);

    /// Whether the transport has been closed, locally or by the peer.
    fn is_closed(&self) -> bool;

    /// Human readable identity of the underlying connection, for logs.
    fn describe(&self) -> String;
}
