//! Byte streams opened through a transport.

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type that can move
/// between tasks, so transports can hand out their own stream types boxed.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// A stream to one remote address, multiplexed over a transport.
pub type TransportStream = Box<dyn AsyncStream>;
