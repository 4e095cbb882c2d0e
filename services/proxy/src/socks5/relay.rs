//! Bidirectional byte relay between a client and a tunneled stream.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by one relay, and the error that ended it, if any.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub bytes_to_remote: u64,
    pub bytes_from_remote: u64,
    pub error: Option<io::Error>,
}

/// Copy bytes both ways until both sides reach EOF or either side fails.
///
/// EOF on one side half-closes the other. The first I/O error ends both
/// directions; byte counts up to that point are still reported. The idle
/// timeout only fires once neither direction has moved data for that long.
pub async fn relay<C, R>(client: C, remote: R, idle_timeout: Option<Duration>) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let to_remote = AtomicU64::new(0);
    let from_remote = AtomicU64::new(0);
    let clock = idle_timeout.map(IdleClock::new);
    let idle = clock.as_ref();

    let result = tokio::try_join!(
        copy_half(&mut client_read, &mut remote_write, idle, &to_remote),
        copy_half(&mut remote_read, &mut client_write, idle, &from_remote),
    );

    RelayStats {
        bytes_to_remote: to_remote.load(Ordering::Relaxed),
        bytes_from_remote: from_remote.load(Ordering::Relaxed),
        error: result.err(),
    }
}

/// Last activity in either direction, as milliseconds since the relay began.
struct IdleClock {
    timeout: Duration,
    started: Instant,
    last_activity_ms: AtomicU64,
}

impl IdleClock {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn deadline(&self) -> Instant {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started + last + self.timeout
    }
}

fn idle_timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "idle timeout")
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Option<&IdleClock>,
    counter: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match idle {
            Some(clock) => loop {
                let deadline = clock.deadline();
                match tokio::time::timeout_at(deadline, reader.read(&mut buf)).await {
                    Ok(result) => break result?,
                    // The other direction moved data since this wait began.
                    Err(_) if clock.deadline() > deadline => continue,
                    Err(_) => return Err(idle_timeout_error()),
                }
            },
            None => reader.read(&mut buf).await?,
        };

        if n == 0 {
            break;
        }
        if let Some(clock) = idle {
            clock.touch();
        }
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_counts_both_directions() {
        let (client, mut client_peer) = duplex(1024);
        let (remote, mut remote_peer) = duplex(1024);

        let task = tokio::spawn(relay(client, remote, None));

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        remote_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        remote_peer.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        drop(client_peer);
        drop(remote_peer);

        let stats = task.await.unwrap();
        assert_eq!(stats.bytes_to_remote, 5);
        assert_eq!(stats.bytes_from_remote, 2);
    }

    #[tokio::test]
    async fn test_relay_half_close_propagates() {
        let (client, mut client_peer) = duplex(1024);
        let (remote, mut remote_peer) = duplex(1024);

        let task = tokio::spawn(relay(client, remote, None));

        client_peer.write_all(b"ping").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        remote_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"ping");

        remote_peer.write_all(b"pong").await.unwrap();
        remote_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        client_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"pong");

        let stats = task.await.unwrap();
        assert!(stats.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_idle_timeout() {
        let (client, _client_peer) = duplex(1024);
        let (remote, _remote_peer) = duplex(1024);

        let stats = relay(client, remote, Some(Duration::from_secs(5))).await;
        let error = stats.error.expect("idle relay should time out");
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_one_way_transfer_outlives_idle_timeout() {
        let (client, mut client_peer) = duplex(1024);
        let (remote, mut remote_peer) = duplex(1024);

        let task = tokio::spawn(relay(client, remote, Some(Duration::from_secs(3))));

        // The remote trickles a byte per second; the client never writes.
        tokio::spawn(async move {
            for i in 0..10u8 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                remote_peer.write_all(&[i]).await.unwrap();
            }
            remote_peer.shutdown().await.unwrap();
            // Keep the remote's read side open until the relay is done.
            let mut sink = Vec::new();
            let _ = remote_peer.read_to_end(&mut sink).await;
        });

        let mut received = Vec::new();
        client_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, (0..10u8).collect::<Vec<_>>());
        client_peer.shutdown().await.unwrap();

        let stats = task.await.unwrap();
        assert_eq!(stats.bytes_from_remote, 10);
        assert!(stats.error.is_none(), "unexpected error: {:?}", stats.error);
    }
}
