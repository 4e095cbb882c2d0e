//! Error types for transport operations.

use std::io;

use thiserror::Error;

use crate::Network;

/// Errors reported by a secure transport.
///
/// Dial failures keep the cause the remote side reported so the front-end can
/// answer each client with the matching rejection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been closed and cannot be used anymore.
    #[error("transport closed")]
    Closed,

    /// The remote peer refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The remote host could not be reached.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The remote network could not be reached.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The remote side failed to connect without a more precise cause.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The remote side refused to open the stream by policy.
    #[error("administratively prohibited: {0}")]
    Prohibited(String),

    /// The operation did not complete in time.
    #[error("operation timed out")]
    TimedOut,

    /// The transport cannot carry this kind of network.
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(Network),

    /// The address is not of the form `host:port`.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the transport protocol or returned something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Stable reason code for structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TransportError::Closed => "transport_closed",
            TransportError::ConnectionRefused(_) => "connection_refused",
            TransportError::HostUnreachable(_) => "host_unreachable",
            TransportError::NetworkUnreachable(_) => "network_unreachable",
            TransportError::ConnectFailed(_) => "connect_failed",
            TransportError::Prohibited(_) => "prohibited",
            TransportError::TimedOut => "timed_out",
            TransportError::UnsupportedNetwork(_) => "unsupported_network",
            TransportError::InvalidAddress(_) => "invalid_address",
            TransportError::Io(_) => "io_error",
            TransportError::Protocol(_) => "protocol_error",
        }
    }

    /// Whether the error means the transport itself is unusable, as opposed to
    /// a failure scoped to one remote address.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::Protocol(_))
    }
}
