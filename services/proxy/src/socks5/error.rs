//! SOCKS5 session errors.

use std::io;

use socktun_tunnel::DialError;
use thiserror::Error;

/// Errors ending one SOCKS5 client session.
#[derive(Debug, Error)]
pub enum Socks5Error {
    /// The client does not speak SOCKS version 5.
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// The client offered no authentication method we accept.
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// The client asked for a command other than CONNECT.
    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// The request carried an unknown address type.
    #[error("unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// The domain name in the request is not valid UTF-8 or is empty.
    #[error("invalid domain name in request")]
    InvalidDomain,

    /// Local resolution of the target failed.
    #[error("resolve failed for {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// The outbound dial failed.
    #[error("dial failed: {0}")]
    Dial(#[from] DialError),

    /// Client socket I/O failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
