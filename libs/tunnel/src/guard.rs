//! Streams that die with their transport.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use socktun_transport::TransportStream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A transport stream bound to the transport's termination signal.
///
/// Once the token fires, every pending and future read, write and flush fails
/// with [`io::ErrorKind::ConnectionAborted`], so relays blocked on the stream
/// wake up instead of waiting on a dead session.
///
/// The read side and the write side wait on the token separately, so a
/// stream split across two tasks wakes both of them.
pub struct GuardedStream {
    inner: TransportStream,
    token: CancellationToken,
    read_cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    write_cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl GuardedStream {
    pub fn new(inner: TransportStream, token: CancellationToken) -> Self {
        Self {
            inner,
            read_cancelled: Box::pin(token.clone().cancelled_owned()),
            write_cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    /// Whether the transport behind this stream has been terminated.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check the termination signal, registering the reader's waker if still alive.
    fn poll_read_aborted(&mut self, cx: &mut Context<'_>) -> bool {
        self.token.is_cancelled() || self.read_cancelled.as_mut().poll(cx).is_ready()
    }

    /// Same as [`Self::poll_read_aborted`] for the writer.
    fn poll_write_aborted(&mut self, cx: &mut Context<'_>) -> bool {
        self.token.is_cancelled() || self.write_cancelled.as_mut().poll(cx).is_ready()
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "transport terminated")
}

impl fmt::Debug for GuardedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedStream")
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for GuardedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_read_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for GuardedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_write_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_write_aborted(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Nothing left to flush into a terminated transport.
        if this.token.is_cancelled() {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
