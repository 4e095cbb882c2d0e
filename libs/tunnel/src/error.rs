//! Error types for the tunnel core.

use socktun_transport::TransportError;
use thiserror::Error;

/// Errors returned by a dial.
#[derive(Debug, Error)]
pub enum DialError {
    /// The transport has been terminated; nothing was sent to it.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// The transport refused or failed the open. Passed through unmodified.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DialError {
    /// Stable reason code for structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            DialError::TransportUnavailable => "transport_unavailable",
            DialError::Transport(e) => e.reason_code(),
        }
    }

    /// The transport error behind this failure, if the transport was reached.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            DialError::TransportUnavailable => None,
            DialError::Transport(e) => Some(e),
        }
    }
}

/// Invalid supervisor configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// The failure threshold must allow at least one failure.
    #[error("max consecutive failures must be at least 1")]
    ZeroFailureThreshold,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_passthrough() {
        let err: DialError = TransportError::ConnectionRefused("10.0.0.9:9999".into()).into();
        assert_eq!(err.to_string(), "connection refused: 10.0.0.9:9999");
        assert_eq!(err.reason_code(), "connection_refused");
        assert!(err.transport_error().is_some());
    }

    #[test]
    fn test_unavailable() {
        let err = DialError::TransportUnavailable;
        assert_eq!(err.to_string(), "transport unavailable");
        assert!(err.transport_error().is_none());
    }
}
