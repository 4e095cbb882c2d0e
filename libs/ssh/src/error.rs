//! Error types for the SSH transport.

use std::time::Duration;

use thiserror::Error;

/// Errors establishing or using an SSH session.
#[derive(Debug, Error)]
pub enum SshError {
    /// The private key could not be read or decoded.
    #[error("key_load_failed: {0}")]
    Key(String),

    /// The server address is malformed.
    #[error("invalid_address: {0}")]
    InvalidAddress(String),

    /// Connect, key exchange and authentication did not finish in time.
    #[error("handshake_timeout: no session after {0:?}")]
    HandshakeTimeout(Duration),

    /// The server rejected the credentials.
    #[error("authentication_failed: user {user}")]
    Authentication { user: String },

    /// The server's host key did not pass the configured policy.
    #[error("host_key_rejected: {0}")]
    HostKey(String),

    /// SSH protocol or I/O failure.
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
}

impl SshError {
    /// Stable reason code for structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SshError::Key(_) => "key_load_failed",
            SshError::InvalidAddress(_) => "invalid_address",
            SshError::HandshakeTimeout(_) => "handshake_timeout",
            SshError::Authentication { .. } => "authentication_failed",
            SshError::HostKey(_) => "host_key_rejected",
            SshError::Ssh(_) => "ssh_error",
        }
    }
}
